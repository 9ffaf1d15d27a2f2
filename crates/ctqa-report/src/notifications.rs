//! 质控事件与通知
//!
//! 一次运行的事件按扫描仪汇总到通知簿. 同一扫描仪的失败事件优先于警告事件.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use ctqa_core::{Result, ScannerIdentity};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 运行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Daily,
    Weekly,
}

impl RunType {
    /// 报告标题前缀
    pub fn title_prefix(&self) -> &'static str {
        match self {
            RunType::Daily => "DAILY",
            RunType::Weekly => "WEEKLY",
        }
    }

    /// 报告标题: `DAILY-<机构>-<型号>-<站点>`
    pub fn report_title(&self, identity: &ScannerIdentity) -> String {
        format!("{}-{}", self.title_prefix(), identity.short_title())
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunType::Daily => write!(f, "daily"),
            RunType::Weekly => write!(f, "weekly"),
        }
    }
}

/// 质控事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QaEvent {
    /// 最新实测中心均值超出控制限
    Failure {
        identity: ScannerIdentity,
        date: NaiveDate,
        value: f64,
    },
    /// 预测值超出控制限
    Warning {
        identity: ScannerIdentity,
        forecast_days: i64,
        predicted: f64,
    },
}

impl QaEvent {
    pub fn identity(&self) -> &ScannerIdentity {
        match self {
            QaEvent::Failure { identity, .. } | QaEvent::Warning { identity, .. } => identity,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QaEvent::Failure { .. })
    }
}

impl fmt::Display for QaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QaEvent::Failure {
                identity,
                date,
                value,
            } => write!(
                f,
                "[失败] {} 在 {} 的中心均值 {:.3} 超出控制限",
                identity,
                date.format("%Y-%m-%d"),
                value
            ),
            QaEvent::Warning {
                identity,
                forecast_days,
                predicted,
            } => write!(
                f,
                "[警告] {} 预计 {} 天后中心均值 {:.3} 超出控制限",
                identity, forecast_days, predicted
            ),
        }
    }
}

/// 一次运行的通知簿
#[derive(Debug, Clone, Serialize)]
pub struct NotificationBook {
    pub run_type: RunType,
    events: BTreeMap<ScannerIdentity, QaEvent>,
    /// 本次运行更新过的报告标题
    pub changed_reports: Vec<String>,
}

impl NotificationBook {
    pub fn new(run_type: RunType) -> Self {
        Self {
            run_type,
            events: BTreeMap::new(),
            changed_reports: Vec::new(),
        }
    }

    /// 记录事件. 失败覆盖同一扫描仪已有的警告, 警告不覆盖已有事件.
    pub fn record(&mut self, event: QaEvent) {
        let identity = event.identity().clone();
        match self.events.get(&identity) {
            Some(existing) if !event.is_failure() => {
                if existing.is_failure() {
                    info!("{} 已有失败事件, 忽略警告", identity);
                }
            }
            _ => {
                self.events.insert(identity, event);
            }
        }
    }

    pub fn mark_report_changed(&mut self, identity: &ScannerIdentity) {
        let title = self.run_type.report_title(identity);
        if !self.changed_reports.contains(&title) {
            self.changed_reports.push(title);
        }
    }

    pub fn event_for(&self, identity: &ScannerIdentity) -> Option<&QaEvent> {
        self.events.get(identity)
    }

    pub fn events(&self) -> impl Iterator<Item = &QaEvent> {
        self.events.values()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

/// 通知发送器特征
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送一次运行的通知
    async fn send(&self, book: &NotificationBook) -> Result<()>;
}

/// 日志通知发送器, 只把事件写入日志
#[derive(Debug, Default)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, book: &NotificationBook) -> Result<()> {
        info!(
            "{} 运行通知: {} 个事件, {} 份报告更新",
            book.run_type,
            book.events.len(),
            book.changed_reports.len()
        );
        for event in book.events() {
            warn!("{}", event);
        }
        for title in &book.changed_reports {
            info!("报告已更新: {}", title);
        }
        Ok(())
    }
}
