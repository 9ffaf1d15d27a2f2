//! 控制限判定

use chrono::NaiveDate;
use ctqa_core::{ScannerIdentity, ScannerProfile, TrendForecast};

use crate::notifications::QaEvent;

/// 漂移判定策略
#[derive(Debug, Clone)]
pub struct DriftPolicy {
    /// 预测天数, 写入警告事件
    pub forecast_days: i64,
}

impl DriftPolicy {
    pub fn new(forecast_days: i64) -> Self {
        Self { forecast_days }
    }

    /// 判定一台扫描仪.
    ///
    /// 最新实测值超限为失败; 否则预测值超限为警告. 未设置的控制限不参与比较.
    pub fn evaluate(
        &self,
        identity: &ScannerIdentity,
        profile: &ScannerProfile,
        latest: Option<(NaiveDate, f64)>,
        forecast: Option<&TrendForecast>,
    ) -> Option<QaEvent> {
        if let Some((date, value)) = latest {
            if profile.is_outside_limits(value) {
                return Some(QaEvent::Failure {
                    identity: identity.clone(),
                    date,
                    value,
                });
            }
        }

        let forecast = forecast?;
        profile
            .is_outside_limits(forecast.forecast_value)
            .then(|| QaEvent::Warning {
                identity: identity.clone(),
                forecast_days: self.forecast_days,
                predicted: forecast.forecast_value,
            })
    }
}
