//! # CTQA存储模块
//!
//! 扫描仪档案和审计时间序列的存储实现:
//! - 内存存储: 测试和一次性运行
//! - JSON文件存储: 档案文件和按扫描仪划分的时间序列目录

pub mod json;
pub mod memory;

pub use json::{JsonProfileStore, JsonSeriesStore, SERIES_FILE_NAME};
pub use memory::{InMemoryProfileStore, InMemorySeriesStore};
