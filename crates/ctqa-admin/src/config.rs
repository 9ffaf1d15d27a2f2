//! 配置管理
//!
//! TOML 配置文件与 `CTQA` 前缀的环境变量分层加载 (如 `CTQA__DETECTOR__DP=2.0`).
//! 配置文件不存在时使用默认值, 格式错误时报错.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<CtqaConfig>>,
    /// 配置文件路径
    config_path: PathBuf,
    /// 配置验证器
    validator: ConfigValidator,
}

/// CTQA完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtqaConfig {
    /// 影像源
    pub source: SourceConfig,
    /// 档案与时间序列存储
    pub storage: StorageConfig,
    /// 体模检测
    pub detector: DetectorConfig,
    /// 趋势预测
    pub forecast: ForecastConfig,
    /// ROI 预览
    pub diagnostics: DiagnosticsConfig,
    /// 日志
    pub logging: LoggingConfig,
}

/// 影像源配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// DICOM 文件目录
    pub image_dir: String,
    /// 最后处理的文件修改时间
    pub watermark: Option<DateTime<Utc>>,
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub profiles_path: String,
    pub data_dir: String,
}

/// 体模检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// 二值化阈值 (HU)
    pub threshold: f64,
    pub dp: f64,
    pub min_dist: f64,
    pub edge_threshold: f64,
    pub accumulator_threshold: u32,
    pub min_radius: usize,
    /// 0 表示不限制
    pub max_radius: usize,
    /// 梯度计算前的高斯平滑, 0 表示关闭
    pub blur_sigma: f32,
}

/// 趋势预测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub days_to_forecast: i64,
    pub daily_days_to_graph: i64,
    pub weekly_days_to_graph: i64,
    pub recent_window_days: i64,
    pub min_recent_points: usize,
}

/// ROI 预览配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub dir: String,
    pub retention_days: u64,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令, 如 `info` 或 `ctqa_audit=debug`
    pub level: String,
    /// 彩色输出
    pub ansi: bool,
    /// 输出日志目标
    pub target: bool,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&CtqaConfig) -> Result<()>,
    /// 错误消息
    error_message: &'static str,
}

impl ConfigManager {
    /// 加载配置文件并创建管理器
    pub fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = Self::load_config(&config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            validator,
        })
    }

    /// 从文件和环境变量加载配置
    fn load_config(config_path: &Path) -> Result<CtqaConfig> {
        let path_str = config_path
            .to_str()
            .context("Configuration path is not valid UTF-8")?;

        let settings = Config::builder()
            .add_source(
                Config::try_from(&CtqaConfig::default())
                    .context("Failed to build default configuration")?,
            )
            .add_source(File::new(path_str, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("CTQA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration: {}", config_path.display()))?;

        let config: CtqaConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if config_path.exists() {
            info!("Configuration loaded from: {}", config_path.display());
        } else {
            info!(
                "Configuration file {} not found, using defaults",
                config_path.display()
            );
        }
        Ok(config)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 获取配置
    pub async fn get_config(&self) -> CtqaConfig {
        self.config.read().await.clone()
    }

    /// 更新配置: 验证, 替换, 保存
    pub async fn update_config(&self, new_config: CtqaConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        self.save_config().await?;
        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    async fn save_config(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_str =
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create configuration directory")?;
            }
        }
        tokio::fs::write(&self.config_path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", self.config_path.display());
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(&self.config_path)?;
        self.validator.validate(&new_config)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded");
        Ok(())
    }

    /// 更新影像源水位线并保存
    pub async fn set_watermark(&self, watermark: DateTime<Utc>) -> Result<()> {
        let mut config = self.get_config().await;
        config.source.watermark = Some(watermark);
        self.update_config(config).await
    }

    /// 验证当前配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "storage",
                validator: |config| {
                    if config.storage.profiles_path.trim().is_empty()
                        || config.storage.data_dir.trim().is_empty()
                    {
                        Err(anyhow::anyhow!("Storage paths cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid storage paths",
            },
            ValidationRule {
                field_path: "detector.dp",
                validator: |config| {
                    if config.detector.dp > 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("dp must be positive, got {}", config.detector.dp))
                    }
                },
                error_message: "Invalid accumulator resolution",
            },
            ValidationRule {
                field_path: "detector.min_dist",
                validator: |config| {
                    if config.detector.min_dist > 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("min_dist must be positive"))
                    }
                },
                error_message: "Invalid minimum circle distance",
            },
            ValidationRule {
                field_path: "detector.blur_sigma",
                validator: |config| {
                    if config.detector.blur_sigma >= 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("blur_sigma cannot be negative"))
                    }
                },
                error_message: "Invalid smoothing sigma",
            },
            ValidationRule {
                field_path: "forecast",
                validator: |config| {
                    let f = &config.forecast;
                    if f.days_to_forecast < 0
                        || f.daily_days_to_graph < 0
                        || f.weekly_days_to_graph < 0
                        || f.recent_window_days < 0
                    {
                        Err(anyhow::anyhow!("Day counts cannot be negative"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid forecast window",
            },
            ValidationRule {
                field_path: "forecast.min_recent_points",
                validator: |config| {
                    if config.forecast.min_recent_points < 2 {
                        Err(anyhow::anyhow!("At least 2 points are needed to fit a line"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid minimum point count",
            },
            ValidationRule {
                field_path: "diagnostics.retention_days",
                validator: |config| {
                    if config.diagnostics.retention_days == 0 {
                        Err(anyhow::anyhow!("Retention days cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid preview retention",
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    EnvFilter::try_new(&config.logging.level)
                        .map(|_| ())
                        .map_err(|e| anyhow::anyhow!("{}", e))
                },
                error_message: "Invalid log level",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &CtqaConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            image_dir: "./images".to_string(),
            watermark: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            profiles_path: "./profiles.json".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: -100.0,
            dp: 2.4,
            min_dist: 100.0,
            edge_threshold: 100.0,
            accumulator_threshold: 100,
            min_radius: 0,
            max_radius: 0,
            blur_sigma: 2.0,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            days_to_forecast: 60,
            daily_days_to_graph: 365,
            weekly_days_to_graph: 90,
            recent_window_days: 30,
            min_recent_points: 3,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "./roi_selections".to_string(),
            retention_days: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            target: false,
        }
    }
}
