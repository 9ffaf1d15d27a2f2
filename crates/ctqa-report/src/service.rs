//! 报告服务
//!
//! 每日运行: 对本次审计涉及的扫描仪按每日作图窗口预测, 并判定失败/警告.
//! 每周运行: 对存储中全部扫描仪按每周作图窗口重新预测, 不产生事件.

use std::sync::Arc;

use chrono::NaiveDate;
use ctqa_core::{ProfileStore, Result, ScannerIdentity, ScannerProfile, SeriesStore, TrendForecast};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::forecast::{center_series, DriftForecaster};
use crate::notifications::{NotificationBook, RunType};
use crate::policy::DriftPolicy;

/// 报告参数
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub days_to_forecast: i64,
    pub daily_days_to_graph: i64,
    pub weekly_days_to_graph: i64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            days_to_forecast: 60,
            daily_days_to_graph: 365,
            weekly_days_to_graph: 90,
        }
    }
}

impl ReportSettings {
    fn graph_days(&self, run_type: RunType) -> i64 {
        match run_type {
            RunType::Daily => self.daily_days_to_graph,
            RunType::Weekly => self.weekly_days_to_graph,
        }
    }
}

/// 单台扫描仪的报告内容
#[derive(Debug, Clone, Serialize)]
pub struct ScannerReport {
    pub title: String,
    pub identity: ScannerIdentity,
    pub points: usize,
    pub forecast: Option<TrendForecast>,
}

/// 报告服务
pub struct ReportService {
    profiles: Arc<dyn ProfileStore>,
    series: Arc<dyn SeriesStore>,
    forecaster: DriftForecaster,
    settings: ReportSettings,
}

impl ReportService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        series: Arc<dyn SeriesStore>,
        forecaster: DriftForecaster,
        settings: ReportSettings,
    ) -> Self {
        Self {
            profiles,
            series,
            forecaster,
            settings,
        }
    }

    async fn build_report(
        &self,
        identity: &ScannerIdentity,
        run_type: RunType,
        now: NaiveDate,
    ) -> Result<ScannerReport> {
        let history = self.series.load_all(identity).await?;
        let points = center_series(&history);
        let forecast = self.forecaster.forecast(
            &points,
            now,
            self.settings.graph_days(run_type),
            self.settings.days_to_forecast,
        );
        debug!("{} 的预测: {:?}", identity, forecast);

        Ok(ScannerReport {
            title: run_type.report_title(identity),
            identity: identity.clone(),
            points: points.len(),
            forecast,
        })
    }

    async fn profile_for(&self, identity: &ScannerIdentity) -> Result<ScannerProfile> {
        match self.profiles.get(identity).await? {
            Some(profile) => Ok(profile),
            None => {
                warn!("扫描仪 {} 没有档案, 按未设置控制限处理", identity);
                Ok(ScannerProfile::with_defaults(identity))
            }
        }
    }

    /// 每日运行. `audited` 为本次审计涉及的扫描仪及其最新 (日期, 中心均值).
    pub async fn daily<I>(
        &self,
        audited: I,
        now: NaiveDate,
    ) -> Result<(NotificationBook, Vec<ScannerReport>)>
    where
        I: IntoIterator<Item = (ScannerIdentity, Option<(NaiveDate, f64)>)>,
    {
        let policy = DriftPolicy::new(self.settings.days_to_forecast);
        let mut book = NotificationBook::new(RunType::Daily);
        let mut reports = Vec::new();

        for (identity, latest) in audited {
            let profile = self.profile_for(&identity).await?;
            let report = self.build_report(&identity, RunType::Daily, now).await?;

            if let Some(event) =
                policy.evaluate(&identity, &profile, latest, report.forecast.as_ref())
            {
                warn!("{}", event);
                book.record(event);
            }
            book.mark_report_changed(&identity);
            reports.push(report);
        }

        info!("每日报告完成: {} 台扫描仪", reports.len());
        Ok((book, reports))
    }

    /// 每周运行, 覆盖存储中的全部扫描仪
    pub async fn weekly(&self, now: NaiveDate) -> Result<(NotificationBook, Vec<ScannerReport>)> {
        let mut book = NotificationBook::new(RunType::Weekly);
        let mut reports = Vec::new();

        for identity in self.series.scanners().await? {
            let report = self.build_report(&identity, RunType::Weekly, now).await?;
            book.mark_report_changed(&identity);
            reports.push(report);
        }

        info!("每周报告完成: {} 台扫描仪", reports.len());
        Ok((book, reports))
    }
}
