//! 审计引擎
//!
//! 运行分三个阶段:
//! 1. 顺序阶段: 分组、档案解析与层面选择 (档案写入在此串行完成)
//! 2. 计算阶段: 各审计单元在阻塞线程池上并行计算, 单元之间不共享可变状态
//! 3. 汇总阶段: 结果按 (扫描仪, 日期) 收集到 [`AuditRun`], 由调用方统一持久化

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use ctqa_core::{
    CtqaError, PhantomGeometry, ProfileStore, QaImage, RegionResult, Result, ScannerIdentity,
    SeriesStore,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::grouping::{group_series, select_slices, AuditUnit, SeriesGroup};
use crate::methods::lookup_methods;
use crate::phantom::{calibrate, PhantomLocator};
use crate::preview::PreviewObserver;
use crate::profiles::ProfileResolver;
use crate::roi::{measure_image, ImageMeasurement};

/// 单次运行的统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// 被过滤或验证失败的影像
    pub images_rejected: usize,
    pub audited: usize,
    /// 无法确定身份或没有匹配层面的序列
    pub skipped: usize,
    pub failed: usize,
    /// 缺少斜率或截距、按原始像素值审计的结果, 可信度较低
    pub degraded: usize,
    /// 本次运行中新建档案的扫描仪
    pub new_scanners: Vec<ScannerIdentity>,
}

/// 单个审计单元的计算产物
#[derive(Debug)]
pub struct AuditedImage {
    pub date: NaiveDate,
    pub geometry: PhantomGeometry,
    pub measurement: ImageMeasurement,
    /// 未做 HU 校准
    pub degraded: bool,
}

/// 审计单元的结果
#[derive(Debug)]
pub enum UnitOutcome {
    Audited {
        identity: ScannerIdentity,
        series_uid: String,
        date: NaiveDate,
        result: RegionResult,
        degraded: bool,
    },
    Failed {
        identity: ScannerIdentity,
        series_uid: String,
        error: CtqaError,
    },
}

/// 单次运行的累积结果. 同一扫描仪同一天的结果后写覆盖先写.
#[derive(Debug, Default)]
pub struct AuditRun {
    results: BTreeMap<ScannerIdentity, BTreeMap<NaiveDate, RegionResult>>,
    degraded: BTreeSet<(ScannerIdentity, NaiveDate)>,
    summary: RunSummary,
}

impl AuditRun {
    pub fn new() -> Self {
        Self {
            results: BTreeMap::new(),
            degraded: BTreeSet::new(),
            summary: RunSummary {
                run_id: Uuid::new_v4(),
                ..Default::default()
            },
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn results(&self) -> &BTreeMap<ScannerIdentity, BTreeMap<NaiveDate, RegionResult>> {
        &self.results
    }

    /// 本次运行有结果的扫描仪
    pub fn scanners(&self) -> impl Iterator<Item = &ScannerIdentity> {
        self.results.keys()
    }

    /// 扫描仪在本次运行中最新日期的结果
    pub fn latest(&self, identity: &ScannerIdentity) -> Option<(NaiveDate, &RegionResult)> {
        self.results
            .get(identity)?
            .iter()
            .next_back()
            .map(|(date, result)| (*date, result))
    }

    /// 该结果是否来自未校准的影像
    pub fn is_degraded(&self, identity: &ScannerIdentity, date: NaiveDate) -> bool {
        self.degraded.contains(&(identity.clone(), date))
    }

    pub fn record(&mut self, identity: ScannerIdentity, date: NaiveDate, result: RegionResult) {
        self.degraded.remove(&(identity.clone(), date));
        self.results.entry(identity).or_default().insert(date, result);
    }

    fn apply(&mut self, outcome: UnitOutcome) -> Result<()> {
        match outcome {
            UnitOutcome::Audited {
                identity,
                series_uid,
                date,
                result,
                degraded,
            } => {
                info!(
                    "审计完成: {} 序列 {} 日期 {} 中心均值 {:?}",
                    identity,
                    series_uid,
                    date,
                    result.center_mean()
                );
                self.summary.audited += 1;
                self.record(identity.clone(), date, result);
                if degraded {
                    warn!("{} 在 {} 的结果来自未校准影像, 可信度较低", identity, date);
                    self.summary.degraded += 1;
                    self.degraded.insert((identity, date));
                }
                Ok(())
            }
            UnitOutcome::Failed {
                identity,
                series_uid,
                error: e,
            } => {
                if !e.is_local() {
                    return Err(e);
                }
                error!("审计失败: {} 序列 {}: {}", identity, series_uid, e);
                self.summary.failed += 1;
                Ok(())
            }
        }
    }

    /// 将本次运行的全部结果写入时间序列存储, 返回写入条数
    pub async fn persist(&self, store: &dyn SeriesStore) -> Result<usize> {
        let mut written = 0;
        for (identity, series) in &self.results {
            for (date, result) in series {
                store.upsert(identity, *date, result.clone()).await?;
                written += 1;
            }
        }
        info!("已持久化 {} 条审计结果", written);
        Ok(written)
    }
}

/// 对单个审计单元执行定位与测量. 纯计算, 可在任意线程调用.
pub fn audit_unit(
    locator: &PhantomLocator,
    preview: Option<&PreviewObserver>,
    unit: &AuditUnit,
) -> Result<AuditedImage> {
    let image = unit.homogeneity_image.as_ref().ok_or_else(|| {
        CtqaError::Validation(format!("序列 {} 没有均匀性影像", unit.series_uid))
    })?;
    let date = image
        .study_date
        .ok_or_else(|| CtqaError::MissingMetadata(format!("StudyDate ({})", image.summary())))?;
    let spacing = image
        .pixel_spacing
        .ok_or_else(|| CtqaError::MissingMetadata(format!("PixelSpacing ({})", image.summary())))?;

    let calibrated = calibrate(image);
    let geometry = locator.locate(&unit.identity, date, &calibrated.pixels)?;
    let definitions = lookup_methods(unit.identity.manufacturer());
    let measurement = measure_image(&calibrated.pixels, &geometry, &definitions, spacing)?;

    if let Some(preview) = preview {
        preview.observe(
            &unit.identity,
            date,
            &calibrated.pixels,
            &geometry,
            &measurement.regions,
        );
    }

    Ok(AuditedImage {
        date,
        geometry,
        measurement,
        degraded: calibrated.degraded,
    })
}

fn evaluate(
    locator: &PhantomLocator,
    preview: Option<&PreviewObserver>,
    unit: AuditUnit,
) -> UnitOutcome {
    match audit_unit(locator, preview, &unit) {
        Ok(audited) => UnitOutcome::Audited {
            identity: unit.identity,
            series_uid: unit.series_uid,
            date: audited.date,
            result: audited.measurement.result,
            degraded: audited.degraded,
        },
        Err(error) => UnitOutcome::Failed {
            identity: unit.identity,
            series_uid: unit.series_uid,
            error,
        },
    }
}

/// 审计引擎
pub struct AuditEngine {
    resolver: ProfileResolver,
    locator: PhantomLocator,
    preview: Option<PreviewObserver>,
}

impl AuditEngine {
    pub fn new(profiles: Arc<dyn ProfileStore>, locator: PhantomLocator) -> Self {
        Self {
            resolver: ProfileResolver::new(profiles),
            locator,
            preview: None,
        }
    }

    /// 启用 ROI 预览输出
    pub fn with_preview(mut self, preview: PreviewObserver) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.resolver
    }

    /// 顺序阶段: 解析档案并选取层面
    async fn prepare_units(
        &self,
        groups: Vec<SeriesGroup>,
        summary: &mut RunSummary,
    ) -> Result<Vec<AuditUnit>> {
        let mut units = Vec::with_capacity(groups.len());
        for group in groups {
            let Some(identity) = group.identity() else {
                warn!("序列 {} 无法确定扫描仪身份, 跳过", group.series_uid);
                summary.skipped += 1;
                continue;
            };

            let resolved = self.resolver.resolve(&identity).await?;
            if resolved.newly_created && !summary.new_scanners.contains(&identity) {
                summary.new_scanners.push(identity.clone());
            }

            let (homogeneity_image, linearity_image) = select_slices(&group, &resolved.profile);
            if homogeneity_image.is_none() {
                info!(
                    "序列 {} 中没有位于 {} 的层面, 跳过 ({})",
                    group.series_uid, resolved.profile.homogeneity_position, identity
                );
                summary.skipped += 1;
                continue;
            }

            units.push(AuditUnit {
                series_uid: group.series_uid,
                identity,
                profile: resolved.profile,
                homogeneity_image,
                linearity_image,
            });
        }
        Ok(units)
    }

    /// 审计一批影像
    pub async fn run(&self, images: Vec<QaImage>) -> Result<AuditRun> {
        let mut run = AuditRun::new();
        info!("开始审计运行 {}: {} 张影像", run.summary.run_id, images.len());

        let (groups, rejected) = group_series(images);
        run.summary.images_rejected = rejected;
        let units = self.prepare_units(groups, &mut run.summary).await?;

        let locator = self.locator.clone();
        let preview = self.preview.clone();
        let outcomes = tokio::task::spawn_blocking(move || {
            if let Some(preview) = &preview {
                preview.purge_expired();
            }
            units
                .into_par_iter()
                .map(|unit| evaluate(&locator, preview.as_ref(), unit))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CtqaError::Internal(format!("审计计算任务异常: {}", e)))?;

        for outcome in outcomes {
            run.apply(outcome)?;
        }

        let summary = &run.summary;
        info!(
            "审计运行 {} 完成: 审计 {} (未校准 {}), 跳过 {}, 失败 {}, 拒绝影像 {}, 新扫描仪 {}",
            summary.run_id,
            summary.audited,
            summary.degraded,
            summary.skipped,
            summary.failed,
            summary.images_rejected,
            summary.new_scanners.len()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::tests::qa_image;
    use crate::phantom::tests::phantom_pixels;
    use crate::roi::{measure_region, region_bounds};
    use ctqa_core::{Direction, MeasurementDefinition, ScannerProfile};
    use ctqa_storage::{InMemoryProfileStore, InMemorySeriesStore};
    use ndarray::Array2;

    fn phantom_image(series: &str, manufacturer: &str, radius: f64, value: i32) -> QaImage {
        let mut image = qa_image(series, 0.0);
        image.manufacturer = Some(manufacturer.to_string());
        image.pixels = Array2::from_shape_fn((512, 512), |(r, c)| {
            let d = (r as f64 - 256.0).hypot(c as f64 - 256.0);
            if d <= radius {
                value
            } else {
                -1000
            }
        });
        image
    }

    fn engine(store: Arc<InMemoryProfileStore>) -> AuditEngine {
        AuditEngine::new(store, PhantomLocator::default())
    }

    #[test]
    fn test_end_to_end_center_measurement() {
        let mut image = qa_image("1.1", 0.0);
        image.manufacturer = Some("ACME".to_string());
        image.pixels = phantom_pixels((256.0, 256.0), 80.0);
        let identity = image.identity().unwrap();
        let unit = AuditUnit {
            series_uid: "1.1".to_string(),
            profile: ScannerProfile::with_defaults(&identity),
            identity,
            homogeneity_image: Some(image.clone()),
            linearity_image: None,
        };

        let audited = audit_unit(&PhantomLocator::default(), None, &unit).unwrap();
        assert!(!audited.degraded);
        assert!((audited.geometry.center_row - 256.0).abs() <= 3.0);
        assert!((audited.geometry.center_col - 256.0).abs() <= 3.0);

        let center_def = MeasurementDefinition::new("audit_one", Direction::Center, 0.0, 400.0);
        let bounds = region_bounds(
            &audited.geometry,
            &center_def,
            image.pixel_spacing.unwrap(),
            (512, 512),
        )
        .unwrap();
        let expected = measure_region(&calibrate(&image).pixels, &bounds);

        let result = &audited.measurement.result;
        assert_eq!(result.center.unwrap().mean, expected.mean().unwrap());
        assert_eq!(result.center.unwrap().std, expected.std(0.0));
        assert!(result.peripheral.is_empty());
        assert!(result.peripheral_comparison.is_empty());
    }

    #[tokio::test]
    async fn test_run_new_scanner_and_persist() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let engine = engine(profiles.clone());

        let images = vec![phantom_image("1.1", "GE Medical Systems", 200.0, 12)];
        let run = engine.run(images).await.unwrap();

        let summary = run.summary();
        assert_eq!(summary.audited, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.new_scanners.len(), 1);
        assert_eq!(profiles.keys().await.unwrap().len(), 1);

        let identity = summary.new_scanners[0].clone();
        let (date, result) = run.latest(&identity).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2018, 5, 31).unwrap());
        assert_eq!(result.center.unwrap().mean, 12.0);
        assert_eq!(result.center.unwrap().std, 0.0);
        assert_eq!(result.peripheral.len(), 4);
        assert!(result.peripheral_comparison.values().all(|&v| v == 0.0));
        assert_eq!(summary.degraded, 0);
        assert!(!run.is_degraded(&identity, date));

        let series = InMemorySeriesStore::new();
        assert_eq!(run.persist(&series).await.unwrap(), 1);
        let stored = series.load_all(&identity).await.unwrap();
        assert_eq!(stored[&date], *result);
    }

    #[tokio::test]
    async fn test_run_counts_rejected_skipped_and_failed() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let engine = engine(profiles.clone());

        let mut patient = phantom_image("2.2", "GE Medical Systems", 200.0, 0);
        patient.patient_birth_date = Some("19650412".to_string());
        let mut dose = phantom_image("3.3", "GE Medical Systems", 200.0, 0);
        dose.series_description = Some("Dose Record".to_string());
        let mut wrong_slice = phantom_image("4.4", "GE Medical Systems", 200.0, 0);
        wrong_slice.slice_location = Some(37.0);
        // 全部为空气, 检测不到体模
        let blank = phantom_image("5.5", "GE Medical Systems", 0.0, -1000);

        let run = engine
            .run(vec![patient, dose, wrong_slice, blank])
            .await
            .unwrap();
        let summary = run.summary();
        assert_eq!(summary.images_rejected, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.audited, 0);
        assert!(run.results().is_empty());
        // 两个序列属于同一台新扫描仪, 只创建一次档案
        assert_eq!(summary.new_scanners.len(), 1);
        assert_eq!(profiles.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_rescale_marks_result_degraded() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let mut image = phantom_image("1.1", "GE Medical Systems", 200.0, 12);
        image.rescale_slope = None;
        let identity = image.identity().unwrap();
        let date = image.study_date.unwrap();

        let run = engine(profiles).run(vec![image]).await.unwrap();
        assert_eq!(run.summary().audited, 1);
        assert_eq!(run.summary().degraded, 1);
        assert!(run.is_degraded(&identity, date));
        // 原始值 12 未经转换
        assert_eq!(run.latest(&identity).unwrap().1.center_mean(), Some(12.0));
    }

    #[tokio::test]
    async fn test_same_day_result_overwritten() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let engine = engine(profiles);

        let first = phantom_image("1.1", "ACME", 150.0, 5);
        let second = phantom_image("1.2", "ACME", 150.0, 9);
        let identity = first.identity().unwrap();

        let run = engine.run(vec![first, second]).await.unwrap();
        assert_eq!(run.summary().audited, 2);
        assert_eq!(run.results()[&identity].len(), 1);
        assert_eq!(run.latest(&identity).unwrap().1.center_mean(), Some(9.0));
    }

    #[tokio::test]
    async fn test_existing_profile_position_is_used() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let mut at_zero = phantom_image("1.1", "ACME", 150.0, 5);
        at_zero.sop_instance_uid = Some("a".to_string());
        let mut at_fifty = phantom_image("1.1", "ACME", 150.0, 7);
        at_fifty.slice_location = Some(50.9);

        let identity = at_zero.identity().unwrap();
        let mut profile = ScannerProfile::with_defaults(&identity);
        profile.homogeneity_position = 50;
        profiles.update(profile).await.unwrap();

        let run = engine(profiles).run(vec![at_zero, at_fifty]).await.unwrap();
        assert!(run.summary().new_scanners.is_empty());
        assert_eq!(run.latest(&identity).unwrap().1.center_mean(), Some(7.0));
    }
}
