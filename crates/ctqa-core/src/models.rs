//! 核心数据模型定义

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{CtqaError, Result};

/// 扫描仪 (阅读器) 身份.
///
/// 由影像元数据中的四个字段确定: 站点名、厂商、型号、机构.
/// 厂商、型号、机构统一转换为大写, 站点名保持原样.
/// 相等性和哈希按结构比较, 展示用字符串只在 IO 边界生成.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScannerIdentity {
    station: String,
    manufacturer: String,
    model: String,
    institution: String,
}

impl ScannerIdentity {
    /// 创建身份并规范化大小写
    pub fn new(station: &str, manufacturer: &str, model: &str, institution: &str) -> Self {
        Self {
            station: station.to_string(),
            manufacturer: manufacturer.to_uppercase(),
            model: model.to_uppercase(),
            institution: institution.to_uppercase(),
        }
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn institution(&self) -> &str {
        &self.institution
    }

    /// 可用作目录名的存储键
    pub fn storage_key(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect()
    }

    /// 报告短标题: `机构-型号-站点`
    pub fn short_title(&self) -> String {
        format!("{}-{}-{}", self.institution, self.model, self.station)
    }
}

impl fmt::Display for ScannerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.station, self.manufacturer, self.model, self.institution
        )
    }
}

/// ROI 方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Center,
    North,
    South,
    East,
    West,
}

impl Direction {
    /// 四个外周方向
    pub const PERIPHERALS: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    #[inline]
    pub fn is_center(&self) -> bool {
        matches!(self, Direction::Center)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Center => write!(f, "CENTER"),
            Direction::North => write!(f, "NORTH"),
            Direction::South => write!(f, "SOUTH"),
            Direction::East => write!(f, "EAST"),
            Direction::West => write!(f, "WEST"),
        }
    }
}

/// 单项测量定义: 方向、距体模中心的物理偏移 (mm)、ROI 物理面积 (mm²).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDefinition {
    pub name: String,
    pub direction: Direction,
    pub offset_mm: f64,
    pub area_mm2: f64,
}

impl MeasurementDefinition {
    pub fn new(name: &str, direction: Direction, offset_mm: f64, area_mm2: f64) -> Self {
        Self {
            name: name.to_string(),
            direction,
            offset_mm,
            area_mm2,
        }
    }
}

/// 基线快照, 记录此前各 ROI 的参考值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Baseline {
    #[serde(default)]
    pub std: Option<f64>,
    #[serde(default)]
    pub center: Option<f64>,
    #[serde(default)]
    pub north: Option<f64>,
    #[serde(default)]
    pub south: Option<f64>,
    #[serde(default)]
    pub east: Option<f64>,
    #[serde(default)]
    pub west: Option<f64>,
}

/// 扫描仪配置档案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerProfile {
    #[serde(rename = "StationName")]
    pub station_name: String,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,
    #[serde(rename = "ManufacturerModelName")]
    pub model: String,
    #[serde(rename = "InstitutionName")]
    pub institution: String,
    /// 均匀性测量的目标层面位置
    #[serde(rename = "HomogeneityPosition", default)]
    pub homogeneity_position: i64,
    /// 线性测量的目标层面位置 (下游暂未使用)
    #[serde(rename = "LinearityPosition", default)]
    pub linearity_position: i64,
    #[serde(rename = "UpperHomogeneityLimit", default)]
    pub upper_limit: Option<f64>,
    #[serde(rename = "LowerHomogeneityLimit", default)]
    pub lower_limit: Option<f64>,
    #[serde(rename = "Baseline", default)]
    pub baseline: Baseline,
}

impl ScannerProfile {
    /// 以默认值创建新档案: 层面位置 0, 控制限未设置.
    pub fn with_defaults(identity: &ScannerIdentity) -> Self {
        Self {
            station_name: identity.station().to_string(),
            manufacturer: identity.manufacturer().to_string(),
            model: identity.model().to_string(),
            institution: identity.institution().to_string(),
            homogeneity_position: 0,
            linearity_position: 0,
            upper_limit: None,
            lower_limit: None,
            baseline: Baseline::default(),
        }
    }

    /// 档案对应的扫描仪身份
    pub fn identity(&self) -> ScannerIdentity {
        ScannerIdentity::new(
            &self.station_name,
            &self.manufacturer,
            &self.model,
            &self.institution,
        )
    }

    /// 值是否超出控制限. 未设置的一侧不参与比较.
    pub fn is_outside_limits(&self, value: f64) -> bool {
        self.upper_limit.is_some_and(|upper| value > upper)
            || self.lower_limit.is_some_and(|lower| value < lower)
    }

    /// 验证档案字段
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("StationName", &self.station_name),
            ("Manufacturer", &self.manufacturer),
            ("ManufacturerModelName", &self.model),
            ("InstitutionName", &self.institution),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(CtqaError::Validation(format!("档案字段 {} 不能为空", name)));
            }
        }

        if let (Some(lower), Some(upper)) = (self.lower_limit, self.upper_limit) {
            if lower > upper {
                return Err(CtqaError::Validation(format!(
                    "控制下限 {} 大于上限 {}",
                    lower, upper
                )));
            }
        }

        Ok(())
    }
}

/// 像素间距 (mm/像素). `row_mm` 为相邻行的间距, `col_mm` 为相邻列的间距.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSpacing {
    pub row_mm: f64,
    pub col_mm: f64,
}

/// 解码后的单张影像, 由影像源协作者提供
#[derive(Debug, Clone)]
pub struct QaImage {
    pub sop_instance_uid: Option<String>,
    pub series_uid: Option<String>,
    pub series_description: Option<String>,
    pub station_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub institution: Option<String>,
    pub pixel_spacing: Option<PixelSpacing>,
    pub rescale_slope: Option<f64>,
    pub rescale_intercept: Option<f64>,
    /// 层面位置标签 (0020,1041)
    pub slice_location: Option<f64>,
    pub study_date: Option<NaiveDate>,
    /// 患者出生日期. 质控体模影像必须存在且为空.
    pub patient_birth_date: Option<String>,
    /// 原始存储值, (行, 列)
    pub pixels: Array2<i32>,
}

impl QaImage {
    /// 由元数据推导扫描仪身份, 任一字段缺失时返回 `None`.
    pub fn identity(&self) -> Option<ScannerIdentity> {
        Some(ScannerIdentity::new(
            self.station_name.as_deref()?,
            self.manufacturer.as_deref()?,
            self.model.as_deref()?,
            self.institution.as_deref()?,
        ))
    }

    /// 截断为整数的层面位置
    #[inline]
    pub fn slice_position(&self) -> Option<i64> {
        self.slice_location.map(|loc| loc.trunc() as i64)
    }

    /// 用于日志的简短描述
    pub fn summary(&self) -> String {
        format!(
            "series={} sop={} date={}",
            self.series_uid.as_deref().unwrap_or("?"),
            self.sop_instance_uid.as_deref().unwrap_or("?"),
            self.study_date
                .map(|d| d.format("%Y%m%d").to_string())
                .unwrap_or_else(|| "?".to_string())
        )
    }
}

/// 检测到的体模圆, 像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhantomGeometry {
    pub center_row: f64,
    pub center_col: f64,
    pub radius: f64,
}

/// 中心 ROI 统计量
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterStats {
    #[serde(rename = "MEAN")]
    pub mean: f64,
    #[serde(rename = "STD")]
    pub std: f64,
}

/// 一台扫描仪一天的均匀性审计结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    #[serde(rename = "CENTER", default, skip_serializing_if = "Option::is_none")]
    pub center: Option<CenterStats>,
    #[serde(rename = "PERIPHERAL", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peripheral: BTreeMap<Direction, f64>,
    #[serde(
        rename = "PERIPHERAL-COMP",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub peripheral_comparison: BTreeMap<Direction, f64>,
}

impl RegionResult {
    #[inline]
    pub fn center_mean(&self) -> Option<f64> {
        self.center.map(|c| c.mean)
    }

    /// 按 `|CENTER.mean - PERIPHERAL[d]|` 重新计算所有外周比较值.
    ///
    /// 没有中心值时比较表为空.
    pub fn derive_comparisons(&mut self) {
        self.peripheral_comparison.clear();
        if let Some(center) = self.center {
            for (direction, mean) in &self.peripheral {
                self.peripheral_comparison
                    .insert(*direction, (center.mean - mean).abs());
            }
        }
    }
}

/// 趋势预测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendForecast {
    pub slope: f64,
    pub intercept: f64,
    pub forecast_date: NaiveDate,
    pub forecast_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ScannerIdentity {
        ScannerIdentity::new(
            "ctbaytest",
            "GE Medical Systems",
            "Discovery CT750 HD",
            "Test Hospital",
        )
    }

    #[test]
    fn test_identity_normalization() {
        let id = identity();
        assert_eq!(
            id.to_string(),
            "ctbaytest-GE MEDICAL SYSTEMS-DISCOVERY CT750 HD-TEST HOSPITAL"
        );
        assert_eq!(
            id,
            ScannerIdentity::new(
                "ctbaytest",
                "GE MEDICAL SYSTEMS",
                "DISCOVERY CT750 HD",
                "TEST HOSPITAL"
            )
        );
    }

    #[test]
    fn test_identity_each_field_matters() {
        let base = identity();
        let variants = [
            ScannerIdentity::new("CTBAYTEST", "GE Medical Systems", "Discovery CT750 HD", "Test Hospital"),
            ScannerIdentity::new("ctbaytest", "Siemens", "Discovery CT750 HD", "Test Hospital"),
            ScannerIdentity::new("ctbaytest", "GE Medical Systems", "Revolution", "Test Hospital"),
            ScannerIdentity::new("ctbaytest", "GE Medical Systems", "Discovery CT750 HD", "Other"),
        ];
        for v in variants {
            assert_ne!(base, v);
        }
    }

    #[test]
    fn test_identity_is_structural() {
        // 拼接后字符串相同, 但字段不同
        let a = ScannerIdentity::new("a-B", "c", "d", "e");
        let b = ScannerIdentity::new("a", "b-c", "d", "e");
        assert_eq!(a.to_string(), "a-B-C-D-E");
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);

        let keys: std::collections::BTreeSet<_> = [a, b].into_iter().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_storage_key_and_title() {
        let id = ScannerIdentity::new("ct/1", "ge", "m", "inst");
        assert_eq!(id.storage_key(), "ct_1-GE-M-INST");
        assert_eq!(id.short_title(), "INST-M-ct/1");
    }

    #[test]
    fn test_profile_defaults_and_limits() {
        let mut profile = ScannerProfile::with_defaults(&identity());
        assert_eq!(profile.homogeneity_position, 0);
        assert_eq!(profile.identity(), identity());
        assert!(!profile.is_outside_limits(1e9));

        profile.upper_limit = Some(4.0);
        profile.lower_limit = Some(-4.0);
        assert!(profile.is_outside_limits(4.5));
        assert!(profile.is_outside_limits(-4.5));
        assert!(!profile.is_outside_limits(4.0));
        assert!(profile.validate().is_ok());

        profile.lower_limit = Some(5.0);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_profile_json_keys() {
        let mut profile = ScannerProfile::with_defaults(&identity());
        profile.upper_limit = Some(4.0);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["ManufacturerModelName"], "DISCOVERY CT750 HD");
        assert_eq!(json["UpperHomogeneityLimit"], 4.0);
        assert!(json["Baseline"]["CENTER"].is_null());
    }

    #[test]
    fn test_region_result_comparisons() {
        let mut result = RegionResult {
            center: Some(CenterStats { mean: 1.5, std: 0.2 }),
            ..Default::default()
        };
        result.peripheral.insert(Direction::North, 3.0);
        result.peripheral.insert(Direction::West, -0.5);
        result.derive_comparisons();

        for (direction, mean) in &result.peripheral {
            assert_eq!(
                result.peripheral_comparison[direction],
                (result.center_mean().unwrap() - mean).abs()
            );
        }

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["CENTER"]["MEAN"], 1.5);
        assert_eq!(json["PERIPHERAL-COMP"]["NORTH"], 1.5);
        let back: RegionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
