//! ROI 选取预览图
//!
//! 将校准后的影像按窗宽窗位映射为灰度, 叠加检测到的体模圆和 ROI 矩形,
//! 保存为 `<目录>/<站点名>.<YYYYMMDD>.png`. 预览失败不影响审计结果.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::NaiveDate;
use ctqa_core::{CtqaError, PhantomGeometry, Result, ScannerIdentity};
use image::{DynamicImage, GrayImage, Luma, Rgb};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::roi::RegionBounds;

/// 预览窗位 (HU)
pub const PREVIEW_WINDOW_LEVEL: f64 = 0.0;
/// 预览窗宽 (HU)
pub const PREVIEW_WINDOW_WIDTH: f64 = 50.0;

const CIRCLE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const REGION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 窗宽窗位映射到 0-255
#[inline]
fn window_value(value: f64, level: f64, width: f64) -> u8 {
    let lower = level - width / 2.0;
    let upper = level + width / 2.0;
    if value <= lower {
        0
    } else if value >= upper {
        255
    } else {
        ((value - lower) / width * 255.0) as u8
    }
}

#[derive(Debug, Clone)]
pub struct PreviewObserver {
    dir: PathBuf,
    retention: Duration,
}

impl PreviewObserver {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            dir: dir.into(),
            retention: Duration::from_secs(retention_days * 24 * 3600),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 预览文件路径
    pub fn preview_path(&self, identity: &ScannerIdentity, date: NaiveDate) -> PathBuf {
        let station: String = identity
            .station()
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.dir
            .join(format!("{}.{}.png", station, date.format("%Y%m%d")))
    }

    /// 渲染并保存预览. 错误只记录日志.
    pub fn observe(
        &self,
        identity: &ScannerIdentity,
        date: NaiveDate,
        pixels: &Array2<f64>,
        geometry: &PhantomGeometry,
        regions: &[RegionBounds],
    ) {
        match self.render(identity, date, pixels, geometry, regions) {
            Ok(path) => debug!("已保存ROI预览: {}", path.display()),
            Err(e) => warn!("保存ROI预览失败 {}: {}", identity, e),
        }
    }

    fn render(
        &self,
        identity: &ScannerIdentity,
        date: NaiveDate,
        pixels: &Array2<f64>,
        geometry: &PhantomGeometry,
        regions: &[RegionBounds],
    ) -> Result<PathBuf> {
        let (rows, cols) = pixels.dim();
        let gray = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([window_value(
                pixels[[y as usize, x as usize]],
                PREVIEW_WINDOW_LEVEL,
                PREVIEW_WINDOW_WIDTH,
            )])
        });
        let mut canvas = DynamicImage::ImageLuma8(gray).to_rgb8();

        draw_hollow_circle_mut(
            &mut canvas,
            (geometry.center_col.round() as i32, geometry.center_row.round() as i32),
            geometry.radius.round() as i32,
            CIRCLE_COLOR,
        );
        for region in regions {
            if region.width() == 0 || region.height() == 0 {
                continue;
            }
            let rect = Rect::at(region.left as i32, region.top as i32)
                .of_size(region.width() as u32, region.height() as u32);
            draw_hollow_rect_mut(&mut canvas, rect, REGION_COLOR);
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.preview_path(identity, date);
        canvas
            .save(&path)
            .map_err(|e| CtqaError::Internal(format!("PNG编码失败: {}", e)))?;
        Ok(path)
    }

    /// 删除超过保留期的预览文件, 返回删除数量
    pub fn purge_expired(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("预览目录不可读 {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > self.retention);
            if !expired {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("删除过期预览失败 {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("已清理 {} 个过期ROI预览", removed);
        }
        removed
    }
}
