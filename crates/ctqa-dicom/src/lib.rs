//! # CTQA DICOM模块
//!
//! 影像源实现：
//! - DICOM文件解码为质控影像记录
//! - 目录影像源：按修改时间水位线增量获取

pub mod parser;
pub mod source;

pub use parser::{decode_file, decode_object, samples_from_bytes};
pub use source::DicomDirectorySource;
