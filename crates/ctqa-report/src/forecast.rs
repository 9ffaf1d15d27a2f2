//! 趋势预测
//!
//! 取作图窗口内、再取最近若干天内的中心均值, 做一元最小二乘拟合并外推.
//! 近期点数不足时不产生预测, 这不是错误.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use ctqa_core::utils::date_ordinal;
use ctqa_core::{RegionResult, TrendForecast};
use tracing::debug;

/// 近期窗口默认天数
pub const RECENT_WINDOW_DAYS: i64 = 30;
/// 产生预测所需的最少近期点数
pub const MIN_RECENT_POINTS: usize = 3;

/// 从时间序列中提取 (日期, 中心均值), 跳过没有中心值的日期
pub fn center_series(series: &BTreeMap<NaiveDate, RegionResult>) -> Vec<(NaiveDate, f64)> {
    series
        .iter()
        .filter_map(|(date, result)| result.center_mean().map(|mean| (*date, mean)))
        .collect()
}

/// 漂移预测器
#[derive(Debug, Clone)]
pub struct DriftForecaster {
    recent_window_days: i64,
    min_recent_points: usize,
}

impl Default for DriftForecaster {
    fn default() -> Self {
        Self::new(RECENT_WINDOW_DAYS, MIN_RECENT_POINTS)
    }
}

impl DriftForecaster {
    pub fn new(recent_window_days: i64, min_recent_points: usize) -> Self {
        Self {
            recent_window_days,
            min_recent_points: min_recent_points.max(2),
        }
    }

    /// 预测 `horizon_days` 天后的中心均值.
    ///
    /// `series` 须按日期升序. 只保留晚于 `now - graph_days` 的点, 再保留晚于
    /// `now - recent_window_days` 的点作为拟合数据.
    pub fn forecast(
        &self,
        series: &[(NaiveDate, f64)],
        now: NaiveDate,
        graph_days: i64,
        horizon_days: i64,
    ) -> Option<TrendForecast> {
        let graph_start = now - Duration::days(graph_days);
        let recent_start = now - Duration::days(self.recent_window_days);
        let recent: Vec<(NaiveDate, f64)> = series
            .iter()
            .filter(|(date, _)| *date > graph_start && *date > recent_start)
            .copied()
            .collect();

        if recent.len() < self.min_recent_points {
            debug!("近期数据点不足 ({} < {}), 不产生预测", recent.len(), self.min_recent_points);
            return None;
        }

        let (first_date, _) = recent[0];
        let (last_date, _) = recent[recent.len() - 1];
        let (slope, shifted_intercept) = fit_line(&recent, first_date)?;

        let origin = date_ordinal(first_date);
        let forecast_date = last_date + Duration::days(horizon_days);
        let forecast_x = (forecast_date - first_date).num_days() as f64;

        Some(TrendForecast {
            slope,
            intercept: shifted_intercept - slope * origin,
            forecast_date,
            forecast_value: slope * forecast_x + shifted_intercept,
        })
    }
}

/// 最小二乘拟合 `y = m·x + b`, x 为相对 `origin` 的天数.
///
/// 以首个日期为原点使正规方程中的和保持为小整数. 所有 x 相同时返回 `None`.
fn fit_line(points: &[(NaiveDate, f64)], origin: NaiveDate) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for (date, y) in points {
        let x = (*date - origin).num_days() as f64;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let denominator = n * sxx - sx * sx;
    if denominator == 0.0 {
        return None;
    }
    let slope = (n * sxy - sx * sy) / denominator;
    let intercept = (sy - slope * sx) / n;
    Some((slope, intercept))
}
