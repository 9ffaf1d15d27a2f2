//! CT质控审计主程序

use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, Utc};
use clap::Parser;
use ctqa_admin::{init_logging, ConfigManager, CtqaConfig};
use ctqa_audit::{AuditEngine, HoughParams, PhantomLocator, PreviewObserver};
use ctqa_core::{ImageSource, ProfileStore, SeriesStore};
use ctqa_dicom::DicomDirectorySource;
use ctqa_report::{
    DriftForecaster, LogNotificationSender, NotificationSender, ReportService, ReportSettings,
};
use ctqa_storage::{JsonProfileStore, JsonSeriesStore};
use tracing::{error, info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "ctqa-runner")]
#[command(about = "CT扫描仪质控审计与漂移预测")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "./ctqa.toml")]
    config: String,

    /// 执行每周报告 (不审计新影像)
    #[arg(long)]
    weekly: bool,

    /// 忽略水位线, 重新获取全部影像
    #[arg(long)]
    all: bool,

    /// 只为新扫描仪创建默认档案
    #[arg(long)]
    provision_only: bool,

    /// 日志级别, 覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,
}

fn build_engine(config: &CtqaConfig, profiles: Arc<dyn ProfileStore>) -> AuditEngine {
    let detector = &config.detector;
    let params = HoughParams {
        dp: detector.dp,
        min_dist: detector.min_dist,
        edge_threshold: detector.edge_threshold,
        accumulator_threshold: detector.accumulator_threshold,
        min_radius: detector.min_radius,
        max_radius: detector.max_radius,
        blur_sigma: detector.blur_sigma,
    };
    let engine = AuditEngine::new(profiles, PhantomLocator::new(detector.threshold, params));

    if config.diagnostics.enabled {
        let preview =
            PreviewObserver::new(&config.diagnostics.dir, config.diagnostics.retention_days);
        let purged = preview.purge_expired();
        if purged > 0 {
            info!("清理过期预览图 {} 个", purged);
        }
        engine.with_preview(preview)
    } else {
        engine
    }
}

fn build_reports(
    config: &CtqaConfig,
    profiles: Arc<dyn ProfileStore>,
    series: Arc<dyn SeriesStore>,
) -> ReportService {
    let forecast = &config.forecast;
    ReportService::new(
        profiles,
        series,
        DriftForecaster::new(forecast.recent_window_days, forecast.min_recent_points),
        ReportSettings {
            days_to_forecast: forecast.days_to_forecast,
            daily_days_to_graph: forecast.daily_days_to_graph,
            weekly_days_to_graph: forecast.weekly_days_to_graph,
        },
    )
}

async fn run(args: Args, manager: ConfigManager) -> Result<()> {
    let config = manager.get_config().await;
    let profiles: Arc<dyn ProfileStore> =
        Arc::new(JsonProfileStore::open(&config.storage.profiles_path).await?);
    let series: Arc<dyn SeriesStore> = Arc::new(JsonSeriesStore::new(&config.storage.data_dir));
    let source = DicomDirectorySource::new(&config.source.image_dir);
    let today = Local::now().date_naive();
    let sender = LogNotificationSender;

    if args.weekly {
        let reports = build_reports(&config, profiles, series);
        let (book, scanners) = reports.weekly(today).await?;
        sender.send(&book).await?;
        info!("每周运行完成, 更新报告 {} 份", scanners.len());
        return Ok(());
    }

    let watermark = if args.all { None } else { config.source.watermark };
    let started = Utc::now();
    let images = source.fetch_since(watermark).await?;
    match source.total_size().await {
        Ok(total) => info!("影像目录数据量: {} bytes", total),
        Err(e) => warn!("无法统计影像目录数据量: {}", e),
    }

    let engine = build_engine(&config, profiles.clone());

    if args.provision_only {
        let created = engine.resolver().provision_all(&images).await?;
        info!("新建扫描仪档案 {} 个", created.len());
        for identity in &created {
            info!("  {}", identity);
        }
        return Ok(());
    }

    let audit = engine.run(images).await?;
    let written = audit.persist(series.as_ref()).await?;
    info!("写入审计结果 {} 条", written);

    let latest: Vec<_> = audit
        .scanners()
        .map(|identity| {
            let point = audit
                .latest(identity)
                .and_then(|(date, result)| result.center_mean().map(|mean| (date, mean)));
            (identity.clone(), point)
        })
        .collect();

    let reports = build_reports(&config, profiles, series);
    let (book, scanners) = reports.daily(latest, today).await?;
    sender.send(&book).await?;

    manager.set_watermark(started).await?;

    let summary = audit.summary();
    info!("每日运行完成 ({})", summary.run_id);
    info!("  拒绝影像: {}", summary.images_rejected);
    info!("  审计成功: {}", summary.audited);
    info!("  跳过序列: {}", summary.skipped);
    info!("  审计失败: {}", summary.failed);
    info!("  未校准: {}", summary.degraded);
    info!("  新扫描仪: {}", summary.new_scanners.len());
    info!("  报告: {}", scanners.len());
    if summary.degraded > 0 {
        warn!("{} 个结果来自缺少 Rescale 参数的影像, 可信度较低", summary.degraded);
    }
    if summary.failed > 0 {
        warn!("{} 个序列审计失败, 详见日志", summary.failed);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(&args.config)?;
    let mut logging = manager.get_config().await.logging;
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    init_logging(&logging)?;

    info!("启动CT质控审计, 配置文件: {}", args.config);

    if let Err(e) = run(args, manager).await {
        error!("运行失败: {:#}", e);
        return Err(e);
    }

    Ok(())
}
