//! DICOM影像解码
//!
//! 提取审计所需的元数据和原始像素值. 只支持非压缩像素数据 (8 位或 16 位, 小端).

use std::path::Path;

use ctqa_core::utils::parse_dicom_date;
use ctqa_core::{CtqaError, PixelSpacing, QaImage, Result};
use dicom::core::value::{PrimitiveValue, Value};
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject};
use ndarray::Array2;
use tracing::{debug, error};

/// 解码DICOM文件
pub fn decode_file(path: &Path) -> Result<QaImage> {
    let obj = open_file(path).map_err(|e| {
        error!("DICOM文件解析失败: {:?}", path);
        CtqaError::Dicom(format!("无法解析DICOM文件 {}: {}", path.display(), e))
    })?;
    decode_object(&obj)
}

/// 从DICOM对象中提取质控影像
pub fn decode_object(obj: &DefaultDicomObject) -> Result<QaImage> {
    let pixel_spacing = get_floats(obj, tags::PIXEL_SPACING).and_then(|values| {
        match values.as_slice() {
            [row_mm, col_mm, ..] => Some(PixelSpacing {
                row_mm: *row_mm,
                col_mm: *col_mm,
            }),
            _ => None,
        }
    });

    let image = QaImage {
        sop_instance_uid: get_string_element(obj, tags::SOP_INSTANCE_UID),
        series_uid: get_string_element(obj, tags::SERIES_INSTANCE_UID),
        series_description: get_string_element(obj, tags::SERIES_DESCRIPTION),
        station_name: get_string_element(obj, tags::STATION_NAME),
        manufacturer: get_string_element(obj, tags::MANUFACTURER),
        model: get_string_element(obj, tags::MANUFACTURER_MODEL_NAME),
        institution: get_string_element(obj, tags::INSTITUTION_NAME),
        pixel_spacing,
        rescale_slope: get_float(obj, tags::RESCALE_SLOPE),
        rescale_intercept: get_float(obj, tags::RESCALE_INTERCEPT),
        slice_location: get_float(obj, tags::SLICE_LOCATION),
        study_date: get_string_element(obj, tags::STUDY_DATE)
            .as_deref()
            .and_then(parse_dicom_date),
        patient_birth_date: get_present_string(obj, tags::PATIENT_BIRTH_DATE),
        pixels: decode_pixels(obj)?,
    };

    debug!("已解码影像: {}", image.summary());
    Ok(image)
}

/// 获取字符串类型元素的值, 去除填充空格. 空值视为缺失.
fn get_string_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
    let element = obj.element(tag).ok()?;
    let value = match element.value() {
        Value::Primitive(PrimitiveValue::Str(s)) => s.to_string(),
        Value::Primitive(PrimitiveValue::Strs(strings)) => strings.first()?.to_string(),
        _ => match element.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => {
                debug!("标签 {:?} 不是字符串类型", tag);
                return None;
            }
        },
    };
    let trimmed = value.trim_matches(|c: char| c == ' ' || c == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// 元素存在即返回字符串, 空值返回空串
fn get_present_string(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
    let element = obj.element(tag).ok()?;
    let value = element
        .to_str()
        .map(|s| s.trim_matches(|c: char| c == ' ' || c == '\0').to_string())
        .unwrap_or_default();
    Some(value)
}

fn get_float(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn get_floats(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}

fn get_integer_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<u32> {
    obj.element(tag).ok()?.to_int::<u32>().ok()
}

/// 将原始字节解释为像素样本 (小端)
pub fn samples_from_bytes(bytes: &[u8], bits_allocated: u16, signed: bool) -> Result<Vec<i32>> {
    match bits_allocated {
        8 => Ok(bytes
            .iter()
            .map(|&b| if signed { b as i8 as i32 } else { b as i32 })
            .collect()),
        16 => {
            if bytes.len() % 2 != 0 {
                return Err(CtqaError::Dicom(format!(
                    "16 位像素数据长度为奇数: {}",
                    bytes.len()
                )));
            }
            Ok(bytes
                .chunks_exact(2)
                .map(|pair| {
                    let raw = [pair[0], pair[1]];
                    if signed {
                        i16::from_le_bytes(raw) as i32
                    } else {
                        u16::from_le_bytes(raw) as i32
                    }
                })
                .collect())
        }
        other => Err(CtqaError::Dicom(format!("不支持的 BitsAllocated: {}", other))),
    }
}

fn decode_pixels(obj: &DefaultDicomObject) -> Result<Array2<i32>> {
    let rows = get_integer_element(obj, tags::ROWS)
        .ok_or_else(|| CtqaError::MissingMetadata("Rows".to_string()))? as usize;
    let cols = get_integer_element(obj, tags::COLUMNS)
        .ok_or_else(|| CtqaError::MissingMetadata("Columns".to_string()))? as usize;
    let bits_allocated = get_integer_element(obj, tags::BITS_ALLOCATED).unwrap_or(16) as u16;
    let signed = get_integer_element(obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;

    let element = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| CtqaError::MissingMetadata("PixelData".to_string()))?;

    let samples: Vec<i32> = match element.value() {
        Value::Primitive(PrimitiveValue::U8(bytes)) => {
            samples_from_bytes(bytes, bits_allocated, signed)?
        }
        Value::Primitive(PrimitiveValue::U16(values)) => values
            .iter()
            .map(|&v| if signed { v as i16 as i32 } else { v as i32 })
            .collect(),
        Value::Primitive(PrimitiveValue::I16(values)) => {
            values.iter().map(|&v| v as i32).collect()
        }
        _ => {
            return Err(CtqaError::Dicom(
                "不支持的像素数据格式 (压缩或封装)".to_string(),
            ))
        }
    };

    let expected = rows * cols;
    if samples.len() < expected {
        return Err(CtqaError::Dicom(format!(
            "像素数量不足: 需要 {} x {} = {}, 实际 {}",
            rows,
            cols,
            expected,
            samples.len()
        )));
    }

    Array2::from_shape_vec((rows, cols), samples[..expected].to_vec())
        .map_err(|e| CtqaError::Dicom(format!("像素数组形状错误: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom::core::{DataElement, VR};
    use dicom::dictionary_std::uids;
    use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
    use std::path::PathBuf;

    /// 写出一个 4x3 的 CT 影像文件, 像素为 16 位有符号
    pub(crate) fn write_test_file(path: &Path, series_uid: &str, birth_date: &str) {
        let pixels: [i16; 12] = [-1000, -1000, -1000, 0, 10, 20, 30, 40, 50, -5, -6, -7];
        let bytes: Vec<u8> = pixels.iter().flat_map(|v| v.to_le_bytes()).collect();

        let obj = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.3680043.1")),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)),
            DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from("QA Homogeneity")),
            DataElement::new(tags::STATION_NAME, VR::SH, PrimitiveValue::from("ctbay2")),
            DataElement::new(tags::MANUFACTURER, VR::LO, PrimitiveValue::from("GE MEDICAL SYSTEMS")),
            DataElement::new(tags::MANUFACTURER_MODEL_NAME, VR::LO, PrimitiveValue::from("Optima CT660")),
            DataElement::new(tags::INSTITUTION_NAME, VR::LO, PrimitiveValue::from("Riverside")),
            DataElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20180531")),
            DataElement::new(tags::PATIENT_BIRTH_DATE, VR::DA, PrimitiveValue::from(birth_date)),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, PrimitiveValue::from("0.5\\0.6")),
            DataElement::new(tags::SLICE_LOCATION, VR::DS, PrimitiveValue::from("75.5")),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-1024")),
            DataElement::new(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(4_u16)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(3_u16)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)),
        ]);

        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.826.0.1.3680043.1"),
            )
            .unwrap();
        file.write_to_file(path).unwrap();
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ctqa-dicom-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_samples_from_bytes() {
        let bytes = [0x18, 0xFC, 0x0A, 0x00];
        assert_eq!(samples_from_bytes(&bytes, 16, true).unwrap(), vec![-1000, 10]);
        assert_eq!(samples_from_bytes(&bytes, 16, false).unwrap(), vec![64536, 10]);
        assert_eq!(samples_from_bytes(&[0xFF, 0x01], 8, true).unwrap(), vec![-1, 1]);
        assert_eq!(samples_from_bytes(&[0xFF, 0x01], 8, false).unwrap(), vec![255, 1]);
        assert!(samples_from_bytes(&bytes[..3], 16, true).is_err());
        assert!(samples_from_bytes(&bytes, 12, true).is_err());
    }

    #[test]
    fn test_decode_file() {
        let dir = temp_dir();
        let path = dir.join("image.dcm");
        write_test_file(&path, "1.2.3.4.5", "");

        let image = decode_file(&path).unwrap();
        assert_eq!(image.series_uid.as_deref(), Some("1.2.3.4.5"));
        assert_eq!(image.station_name.as_deref(), Some("ctbay2"));
        assert_eq!(image.model.as_deref(), Some("Optima CT660"));
        assert_eq!(
            image.pixel_spacing,
            Some(PixelSpacing {
                row_mm: 0.5,
                col_mm: 0.6
            })
        );
        assert_eq!(image.slice_position(), Some(75));
        assert_eq!(image.rescale_intercept, Some(-1024.0));
        assert_eq!(image.study_date, parse_dicom_date("20180531"));
        assert_eq!(image.patient_birth_date.as_deref(), Some(""));
        assert_eq!(image.pixels.dim(), (4, 3));
        assert_eq!(image.pixels[[0, 0]], -1000);
        assert_eq!(image.pixels[[3, 2]], -7);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_decode_invalid_file() {
        let dir = temp_dir();
        let path = dir.join("broken.dcm");
        std::fs::write(&path, b"not a dicom file").unwrap();
        assert!(matches!(decode_file(&path), Err(CtqaError::Dicom(_))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
