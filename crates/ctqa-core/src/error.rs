//! 错误定义模块

use thiserror::Error;

use crate::models::Direction;

/// CTQA系统统一错误类型
#[derive(Error, Debug)]
pub enum CtqaError {
    #[error("缺少必需的元数据: {0}")]
    MissingMetadata(String),

    #[error("影像包含患者身份信息, 拒绝审计: {0}")]
    PatientIdentity(String),

    #[error("未找到体模: 扫描仪 {identity}, 日期 {date}")]
    PhantomNotFound { identity: String, date: String },

    #[error(
        "ROI越界: 方向 {direction}, 区域 [{top}, {bottom}) x [{left}, {right}), 图像 {rows} x {cols}"
    )]
    RegionOutOfBounds {
        direction: Direction,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
        rows: usize,
        cols: usize,
    },

    #[error("存储错误: {0}")]
    Store(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl CtqaError {
    /// 是否为单个影像/序列范围内的错误.
    ///
    /// 局部错误只跳过当前审计单元; 其余错误 (存储、IO、配置) 终止整个运行.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            CtqaError::MissingMetadata(_)
                | CtqaError::PatientIdentity(_)
                | CtqaError::PhantomNotFound { .. }
                | CtqaError::RegionOutOfBounds { .. }
                | CtqaError::Dicom(_)
                | CtqaError::Validation(_)
        )
    }
}

/// CTQA系统统一结果类型
pub type Result<T> = std::result::Result<T, CtqaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_locality() {
        assert!(CtqaError::PhantomNotFound {
            identity: "A-B-C-D".to_string(),
            date: "20240101".to_string(),
        }
        .is_local());
        assert!(CtqaError::MissingMetadata("PixelSpacing".to_string()).is_local());
        assert!(!CtqaError::Store("profiles.json 无法写入".to_string()).is_local());
        assert!(!CtqaError::Io(std::io::Error::other("disk")).is_local());
    }

    #[test]
    fn test_out_of_bounds_message() {
        let err = CtqaError::RegionOutOfBounds {
            direction: Direction::North,
            top: -4,
            left: 10,
            bottom: 16,
            right: 30,
            rows: 64,
            cols: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("NORTH"));
        assert!(msg.contains("64 x 64"));
    }
}
