//! 通用工具函数

use chrono::{Datelike, NaiveDate};

/// 解析 DICOM DA 格式日期 (`YYYYMMDD`)
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// 格式化为 DICOM DA 格式日期
pub fn format_dicom_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// 日期的数值序数 (自公元元年起的天数), 用于回归拟合
#[inline]
pub fn date_ordinal(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}
