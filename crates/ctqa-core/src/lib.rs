//! # CTQA Core
//!
//! CT 质控审计系统的核心模块，提供基础数据结构、错误定义、日期工具以及外部协作者接口。

pub mod error;
pub mod models;
pub mod store;
pub mod utils;

pub use error::{CtqaError, Result};
pub use models::*;
pub use store::{ImageSource, ProfileStore, SeriesStore};
