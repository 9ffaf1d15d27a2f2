//! ROI 区域统计
//!
//! 方向与轴的对应关系: NORTH/SOUTH 沿行轴 (行号减小/增大), WEST/EAST 沿列轴
//! (列号减小/增大). 物理尺寸分别按行间距和列间距换算为像素.

use ctqa_core::{
    CenterStats, CtqaError, Direction, MeasurementDefinition, PhantomGeometry, PixelSpacing,
    RegionResult, Result,
};
use ndarray::{s, Array1, Array2};
use serde::Serialize;

/// ROI 像素范围, 下界包含, 上界不包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionBounds {
    pub direction: Direction,
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl RegionBounds {
    pub fn height(&self) -> usize {
        self.bottom - self.top
    }

    pub fn width(&self) -> usize {
        self.right - self.left
    }
}

/// 单张影像的测量结果
#[derive(Debug)]
pub struct ImageMeasurement {
    pub result: RegionResult,
    /// 全部 ROI, 供预览使用
    pub regions: Vec<RegionBounds>,
}

/// 计算测量定义对应的像素范围.
///
/// 任一边越界时整体拒绝, 不做裁剪.
pub fn region_bounds(
    geometry: &PhantomGeometry,
    definition: &MeasurementDefinition,
    spacing: PixelSpacing,
    shape: (usize, usize),
) -> Result<RegionBounds> {
    if spacing.row_mm <= 0.0 || spacing.col_mm <= 0.0 {
        return Err(CtqaError::Validation(format!(
            "像素间距无效: {} x {}",
            spacing.row_mm, spacing.col_mm
        )));
    }

    let half_side_mm = definition.area_mm2.max(0.0).sqrt() / 2.0;
    let half_rows = half_side_mm / spacing.row_mm;
    let half_cols = half_side_mm / spacing.col_mm;
    let offset_rows = definition.offset_mm / spacing.row_mm;
    let offset_cols = definition.offset_mm / spacing.col_mm;

    let (row_shift, col_shift) = match definition.direction {
        Direction::Center => (0.0, 0.0),
        Direction::North => (-offset_rows, 0.0),
        Direction::South => (offset_rows, 0.0),
        Direction::West => (0.0, -offset_cols),
        Direction::East => (0.0, offset_cols),
    };
    let row_center = geometry.center_row + row_shift;
    let col_center = geometry.center_col + col_shift;

    let top = (row_center - half_rows).floor() as i64;
    let bottom = (row_center + half_rows).floor() as i64;
    let left = (col_center - half_cols).floor() as i64;
    let right = (col_center + half_cols).floor() as i64;

    let (rows, cols) = shape;
    if top < 0 || left < 0 || bottom > rows as i64 || right > cols as i64 {
        return Err(CtqaError::RegionOutOfBounds {
            direction: definition.direction,
            top,
            left,
            bottom,
            right,
            rows,
            cols,
        });
    }
    if top >= bottom || left >= right {
        return Err(CtqaError::Validation(format!(
            "ROI {} 为空: 面积 {} mm²",
            definition.name, definition.area_mm2
        )));
    }

    Ok(RegionBounds {
        direction: definition.direction,
        top: top as usize,
        left: left as usize,
        bottom: bottom as usize,
        right: right as usize,
    })
}

/// 按行优先顺序提取 ROI 内的像素
pub fn measure_region(pixels: &Array2<f64>, bounds: &RegionBounds) -> Array1<f64> {
    pixels
        .slice(s![bounds.top..bounds.bottom, bounds.left..bounds.right])
        .iter()
        .copied()
        .collect()
}

/// 对一张校准后的影像执行所有测量定义.
///
/// 所有方向共用同一个体模几何, 任一 ROI 越界或为空都使整张影像失败.
pub fn measure_image(
    pixels: &Array2<f64>,
    geometry: &PhantomGeometry,
    definitions: &[MeasurementDefinition],
    spacing: PixelSpacing,
) -> Result<ImageMeasurement> {
    let mut result = RegionResult::default();
    let mut regions = Vec::with_capacity(definitions.len());

    for definition in definitions {
        let bounds = region_bounds(geometry, definition, spacing, pixels.dim())?;

        let samples = measure_region(pixels, &bounds);
        let Some(mean) = samples.mean() else {
            continue;
        };
        if definition.direction.is_center() {
            result.center = Some(CenterStats {
                mean,
                std: samples.std(0.0),
            });
        } else {
            result.peripheral.insert(definition.direction, mean);
        }
        regions.push(bounds);
    }

    if result.center.is_none() {
        return Err(CtqaError::Validation(
            "测量定义中缺少 CENTER ROI".to_string(),
        ));
    }
    result.derive_comparisons();

    Ok(ImageMeasurement { result, regions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::lookup_methods;

    fn geometry(row: f64, col: f64) -> PhantomGeometry {
        PhantomGeometry {
            center_row: row,
            center_col: col,
            radius: 80.0,
        }
    }

    const HALF_MM: PixelSpacing = PixelSpacing {
        row_mm: 0.5,
        col_mm: 0.5,
    };

    #[test]
    fn test_center_bounds() {
        let def = MeasurementDefinition::new("audit_one", Direction::Center, 0.0, 400.0);
        let bounds = region_bounds(&geometry(256.0, 256.0), &def, HALF_MM, (512, 512)).unwrap();
        assert_eq!((bounds.top, bounds.bottom), (236, 276));
        assert_eq!((bounds.left, bounds.right), (236, 276));
        assert_eq!(bounds.height(), 40);
    }

    #[test]
    fn test_direction_axes() {
        let g = geometry(256.0, 256.0);
        let bounds_for = |direction| {
            let def = MeasurementDefinition::new("d", direction, 75.0, 400.0);
            region_bounds(&g, &def, HALF_MM, (512, 512)).unwrap()
        };

        // 75mm / 0.5 = 150 像素
        assert_eq!(bounds_for(Direction::North).top, 86);
        assert_eq!(bounds_for(Direction::South).top, 386);
        assert_eq!(bounds_for(Direction::West).left, 86);
        assert_eq!(bounds_for(Direction::East).left, 386);
        assert_eq!(bounds_for(Direction::North).left, 236);
        assert_eq!(bounds_for(Direction::East).top, 236);
    }

    #[test]
    fn test_anisotropic_spacing() {
        let spacing = PixelSpacing {
            row_mm: 0.5,
            col_mm: 1.0,
        };
        let def = MeasurementDefinition::new("c", Direction::Center, 0.0, 400.0);
        let bounds = region_bounds(&geometry(100.0, 100.0), &def, spacing, (200, 200)).unwrap();
        assert_eq!(bounds.height(), 40);
        assert_eq!(bounds.width(), 20);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let def = MeasurementDefinition::new("n", Direction::North, 75.0, 400.0);
        let err = region_bounds(&geometry(100.0, 256.0), &def, HALF_MM, (512, 512)).unwrap_err();
        assert!(matches!(
            err,
            CtqaError::RegionOutOfBounds {
                direction: Direction::North,
                ..
            }
        ));
    }

    #[test]
    fn test_measure_region_row_major() {
        let pixels = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        let bounds = RegionBounds {
            direction: Direction::Center,
            top: 1,
            left: 1,
            bottom: 3,
            right: 3,
        };
        assert_eq!(measure_region(&pixels, &bounds).to_vec(), vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_measure_image_statistics() {
        let pixels = Array2::from_shape_fn((512, 512), |(r, c)| ((r + 2 * c) % 5) as f64);
        let g = geometry(256.0, 256.0);
        let definitions = lookup_methods("GE MEDICAL SYSTEMS");
        let measurement = measure_image(&pixels, &g, &definitions, HALF_MM).unwrap();

        let center_def = MeasurementDefinition::new("c", Direction::Center, 0.0, 400.0);
        let bounds = region_bounds(&g, &center_def, HALF_MM, (512, 512)).unwrap();
        let region = measure_region(&pixels, &bounds);

        let center = measurement.result.center.unwrap();
        assert_eq!(center.mean, region.mean().unwrap());
        assert_eq!(center.std, region.std(0.0));
        assert_eq!(measurement.result.peripheral.len(), 4);
        assert_eq!(measurement.result.peripheral_comparison.len(), 4);
        assert_eq!(measurement.regions.len(), 5);
    }

    #[test]
    fn test_peripheral_out_of_bounds_fails_image() {
        let pixels = Array2::from_elem((512, 512), 3.0);
        // 靠近上边缘, 只有 NORTH 越界, 其余方向也不产生结果
        let g = geometry(120.0, 256.0);
        let definitions = lookup_methods("GE MEDICAL SYSTEMS");
        let err = measure_image(&pixels, &g, &definitions, HALF_MM).unwrap_err();

        assert!(matches!(
            err,
            CtqaError::RegionOutOfBounds {
                direction: Direction::North,
                top: -50,
                ..
            }
        ));
    }

    #[test]
    fn test_center_failure_fails_image() {
        let pixels = Array2::from_elem((64, 64), 0.0);
        let definitions = lookup_methods("DEFAULT");
        assert!(measure_image(&pixels, &geometry(5.0, 5.0), &definitions, HALF_MM).is_err());
    }
}
