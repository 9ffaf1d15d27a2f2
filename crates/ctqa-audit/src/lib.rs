//! # CTQA审计模块
//!
//! 均匀性审计引擎，包括：
//! - 审计方法表：按厂商给出 ROI 测量定义
//! - 序列分组与层面选择：过滤非质控序列，按档案位置选取影像
//! - 档案解析：为新扫描仪自动创建默认档案
//! - 体模定位：刻度变换、二值化与霍夫圆检测
//! - ROI 统计：物理尺寸到像素的换算、均值/标准差与外周比较
//! - 诊断预览：可选的 ROI 标注图输出

pub mod engine;
pub mod grouping;
pub mod hough;
pub mod methods;
pub mod phantom;
pub mod preview;
pub mod profiles;
pub mod roi;

// 重新导出主要类型
pub use engine::{audit_unit, AuditEngine, AuditRun, AuditedImage, RunSummary, UnitOutcome};
pub use grouping::{check_image, group_series, select_slices, AuditUnit, SeriesGroup, SERIES_TO_DISCARD};
pub use hough::{detect_circles, HoughCircle, HoughParams};
pub use methods::{audit_directions, lookup_methods};
pub use phantom::{binarize, calibrate, CalibratedImage, PhantomLocator, DENSITY_THRESHOLD_HU};
pub use preview::PreviewObserver;
pub use profiles::{ProfileResolver, ResolvedProfile};
pub use roi::{measure_image, measure_region, region_bounds, ImageMeasurement, RegionBounds};
