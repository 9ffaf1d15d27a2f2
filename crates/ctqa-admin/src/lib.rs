//! # CTQA管理模块
//!
//! 提供配置管理和日志初始化：
//! - 配置管理：TOML 文件与环境变量分层加载、验证、保存
//! - 日志：基于 tracing-subscriber 的控制台日志

pub mod config;
pub mod logging;

pub use config::{
    ConfigManager, ConfigValidator, CtqaConfig, DetectorConfig, DiagnosticsConfig,
    ForecastConfig, LoggingConfig, SourceConfig, StorageConfig,
};
pub use logging::init_logging;
