//! 体模定位
//!
//! 原始值 -> HU 校准 -> 阈值二值化 -> 霍夫圆检测, 取第一个检测到的圆.

use chrono::NaiveDate;
use ctqa_core::{CtqaError, PhantomGeometry, QaImage, Result, ScannerIdentity};
use ndarray::Array2;
use tracing::{debug, warn};

use crate::hough::{detect_circles, HoughParams};

/// 默认密度阈值 (HU), 高于该值视为体模
pub const DENSITY_THRESHOLD_HU: f64 = -100.0;

/// 校准后的影像
#[derive(Debug, Clone)]
pub struct CalibratedImage {
    pub pixels: Array2<f64>,
    /// 缺少斜率或截距, 直接使用原始值
    pub degraded: bool,
}

/// 按 `value = slope * raw + intercept` 转换为 HU.
///
/// 斜率或截距缺失时不做转换, 标记为降级并记录警告.
pub fn calibrate(image: &QaImage) -> CalibratedImage {
    match (image.rescale_slope, image.rescale_intercept) {
        (Some(slope), Some(intercept)) => CalibratedImage {
            pixels: image.pixels.mapv(|raw| slope * raw as f64 + intercept),
            degraded: false,
        },
        _ => {
            warn!("影像缺少 RescaleSlope/RescaleIntercept, 使用原始像素值: {}", image.summary());
            CalibratedImage {
                pixels: image.pixels.mapv(|raw| raw as f64),
                degraded: true,
            }
        }
    }
}

/// 阈值二值化: 大于阈值为 255, 否则为 0
pub fn binarize(pixels: &Array2<f64>, threshold: f64) -> Array2<u8> {
    pixels.mapv(|v| if v > threshold { 255 } else { 0 })
}

/// 体模定位器
#[derive(Debug, Clone)]
pub struct PhantomLocator {
    threshold: f64,
    params: HoughParams,
}

impl Default for PhantomLocator {
    fn default() -> Self {
        Self::new(DENSITY_THRESHOLD_HU, HoughParams::default())
    }
}

impl PhantomLocator {
    pub fn new(threshold: f64, params: HoughParams) -> Self {
        Self { threshold, params }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn params(&self) -> &HoughParams {
        &self.params
    }

    /// 在校准后的影像上定位体模, 未检测到圆时返回 `None`
    pub fn detect(&self, pixels: &Array2<f64>) -> Option<PhantomGeometry> {
        let binary = binarize(pixels, self.threshold);
        let circles = detect_circles(binary.view(), &self.params);
        debug!("检测到 {} 个候选圆", circles.len());

        circles.first().map(|circle| PhantomGeometry {
            center_row: circle.center_row,
            center_col: circle.center_col,
            radius: circle.radius,
        })
    }

    /// 定位体模, 失败时返回 `PhantomNotFound`
    pub fn locate(
        &self,
        identity: &ScannerIdentity,
        date: NaiveDate,
        pixels: &Array2<f64>,
    ) -> Result<PhantomGeometry> {
        self.detect(pixels)
            .ok_or_else(|| CtqaError::PhantomNotFound {
                identity: identity.to_string(),
                date: date.format("%Y%m%d").to_string(),
            })
    }
}
