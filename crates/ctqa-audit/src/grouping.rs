//! 序列分组与层面选择
//!
//! 过滤非质控序列和不合格影像, 按序列 UID 分组, 再按档案中配置的层面位置选取审计影像.

use std::collections::HashMap;

use ctqa_core::{CtqaError, QaImage, Result, ScannerIdentity, ScannerProfile};
use tracing::{debug, warn};

/// 不参与审计的序列描述
pub const SERIES_TO_DISCARD: [&str; 4] = ["Dose Report", "Res", "LCD", "Dose Record"];

/// 同一序列的影像
#[derive(Debug, Clone)]
pub struct SeriesGroup {
    pub series_uid: String,
    pub images: Vec<QaImage>,
}

impl SeriesGroup {
    /// 由序列首张影像推导扫描仪身份
    pub fn identity(&self) -> Option<ScannerIdentity> {
        self.images.first().and_then(QaImage::identity)
    }
}

/// 一个序列的审计单元
#[derive(Debug, Clone)]
pub struct AuditUnit {
    pub series_uid: String,
    pub identity: ScannerIdentity,
    pub profile: ScannerProfile,
    pub homogeneity_image: Option<QaImage>,
    /// 线性测量影像, 暂未参与计算
    pub linearity_image: Option<QaImage>,
}

/// 返回第一个缺失的必需字段名
fn missing_field(image: &QaImage) -> Option<&'static str> {
    let checks: [(&'static str, bool); 10] = [
        ("SeriesInstanceUID", image.series_uid.is_some()),
        ("SeriesDescription", image.series_description.is_some()),
        ("StationName", image.station_name.is_some()),
        ("Manufacturer", image.manufacturer.is_some()),
        ("ManufacturerModelName", image.model.is_some()),
        ("InstitutionName", image.institution.is_some()),
        ("PixelSpacing", image.pixel_spacing.is_some()),
        ("StudyDate", image.study_date.is_some()),
        ("SliceLocation", image.slice_location.is_some()),
        ("PatientBirthDate", image.patient_birth_date.is_some()),
    ];
    checks
        .into_iter()
        .find(|(_, present)| !present)
        .map(|(name, _)| name)
        .or_else(|| image.pixels.is_empty().then_some("PixelData"))
}

/// 检查影像是否具备审计条件.
///
/// 缺少必需元数据或出生日期非空 (真实患者检查) 的影像被拒绝.
pub fn check_image(image: &QaImage) -> Result<()> {
    if let Some(field) = missing_field(image) {
        return Err(CtqaError::MissingMetadata(format!(
            "{} ({})",
            field,
            image.summary()
        )));
    }

    if image
        .patient_birth_date
        .as_deref()
        .is_some_and(|birth| !birth.trim().is_empty())
    {
        return Err(CtqaError::PatientIdentity(image.summary()));
    }

    Ok(())
}

/// 是否属于排除的非质控序列
#[inline]
fn is_discarded_series(image: &QaImage) -> bool {
    image
        .series_description
        .as_deref()
        .is_some_and(|desc| SERIES_TO_DISCARD.contains(&desc))
}

/// 按序列 UID 分组, 保持序列首次出现的顺序.
///
/// 返回分组结果和被拒绝的影像数量.
pub fn group_series(images: Vec<QaImage>) -> (Vec<SeriesGroup>, usize) {
    let mut groups: Vec<SeriesGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rejected = 0usize;

    for image in images {
        if is_discarded_series(&image) {
            debug!("跳过非质控序列影像: {}", image.summary());
            rejected += 1;
            continue;
        }

        if let Err(e) = check_image(&image) {
            warn!("拒绝影像: {}", e);
            rejected += 1;
            continue;
        }

        // check_image 已保证序列 UID 存在
        let Some(series_uid) = image.series_uid.clone() else {
            continue;
        };

        match index.get(&series_uid) {
            Some(&pos) => groups[pos].images.push(image),
            None => {
                index.insert(series_uid.clone(), groups.len());
                groups.push(SeriesGroup {
                    series_uid,
                    images: vec![image],
                });
            }
        }
    }

    debug!("影像分组完成: {} 个序列, {} 张影像被拒绝", groups.len(), rejected);
    (groups, rejected)
}

/// 按档案位置选取均匀性影像和线性影像. 多张匹配时取最后一张.
pub fn select_slices(
    group: &SeriesGroup,
    profile: &ScannerProfile,
) -> (Option<QaImage>, Option<QaImage>) {
    let mut homogeneity = None;
    let mut linearity = None;

    for image in &group.images {
        let Some(position) = image.slice_position() else {
            continue;
        };
        if position == profile.homogeneity_position {
            homogeneity = Some(image);
        }
        if position == profile.linearity_position {
            linearity = Some(image);
        }
    }

    (homogeneity.cloned(), linearity.cloned())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ctqa_core::PixelSpacing;
    use ndarray::Array2;

    pub(crate) fn qa_image(series: &str, position: f64) -> QaImage {
        QaImage {
            sop_instance_uid: Some(format!("{}.{}", series, position)),
            series_uid: Some(series.to_string()),
            series_description: Some("QA Axial".to_string()),
            station_name: Some("ctbaytest".to_string()),
            manufacturer: Some("GE Medical Systems".to_string()),
            model: Some("Discovery CT750 HD".to_string()),
            institution: Some("Test Hospital".to_string()),
            pixel_spacing: Some(PixelSpacing {
                row_mm: 0.5,
                col_mm: 0.5,
            }),
            rescale_slope: Some(1.0),
            rescale_intercept: Some(0.0),
            slice_location: Some(position),
            study_date: NaiveDate::from_ymd_opt(2018, 5, 31),
            patient_birth_date: Some(String::new()),
            pixels: Array2::zeros((8, 8)),
        }
    }

    #[test]
    fn test_check_image() {
        assert!(check_image(&qa_image("1.2", 0.0)).is_ok());

        let mut missing = qa_image("1.2", 0.0);
        missing.pixel_spacing = None;
        assert!(matches!(
            check_image(&missing),
            Err(CtqaError::MissingMetadata(msg)) if msg.starts_with("PixelSpacing")
        ));

        let mut no_birth_tag = qa_image("1.2", 0.0);
        no_birth_tag.patient_birth_date = None;
        assert!(matches!(
            check_image(&no_birth_tag),
            Err(CtqaError::MissingMetadata(_))
        ));

        let mut patient = qa_image("1.2", 0.0);
        patient.patient_birth_date = Some("19700101".to_string());
        assert!(matches!(
            check_image(&patient),
            Err(CtqaError::PatientIdentity(_))
        ));

        let mut empty = qa_image("1.2", 0.0);
        empty.pixels = Array2::zeros((0, 0));
        assert!(check_image(&empty).is_err());
    }

    #[test]
    fn test_group_series() {
        let mut dose = qa_image("9.9", 0.0);
        dose.series_description = Some("Dose Report".to_string());
        let mut patient = qa_image("1.1", 5.0);
        patient.patient_birth_date = Some("19800101".to_string());

        let images = vec![
            qa_image("1.1", 0.0),
            qa_image("2.2", 0.0),
            dose,
            qa_image("1.1", 10.0),
            patient,
        ];
        let (groups, rejected) = group_series(images);

        assert_eq!(rejected, 2);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].series_uid, "1.1");
        assert_eq!(groups[0].images.len(), 2);
        assert_eq!(groups[1].series_uid, "2.2");
        assert_eq!(
            groups[0].identity().unwrap().to_string(),
            "ctbaytest-GE MEDICAL SYSTEMS-DISCOVERY CT750 HD-TEST HOSPITAL"
        );
    }

    #[test]
    fn test_select_slices() {
        let group = SeriesGroup {
            series_uid: "1.1".to_string(),
            images: vec![
                qa_image("1.1", 0.0),
                qa_image("1.1", 75.4),
                qa_image("1.1", 80.0),
            ],
        };
        let mut profile = ScannerProfile::with_defaults(&group.identity().unwrap());
        profile.homogeneity_position = 75;
        profile.linearity_position = 80;

        let (homogeneity, linearity) = select_slices(&group, &profile);
        assert_eq!(homogeneity.unwrap().slice_location, Some(75.4));
        assert_eq!(linearity.unwrap().slice_location, Some(80.0));

        profile.homogeneity_position = 42;
        let (homogeneity, _) = select_slices(&group, &profile);
        assert!(homogeneity.is_none());
    }
}
