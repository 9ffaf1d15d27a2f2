//! # CTQA报告模块
//!
//! 漂移预测与通知，包括：
//! - 趋势预测：近期窗口内的最小二乘拟合与外推
//! - 判定策略：实测值超限为失败, 预测值超限为警告
//! - 通知簿：按运行类型汇总事件并交给通知发送器
//! - 报告服务：每日/每周运行的预测流程

pub mod forecast;
pub mod notifications;
pub mod policy;
pub mod service;

pub use forecast::{center_series, DriftForecaster};
pub use notifications::{LogNotificationSender, NotificationBook, NotificationSender, QaEvent, RunType};
pub use policy::DriftPolicy;
pub use service::{ReportService, ReportSettings, ScannerReport};
