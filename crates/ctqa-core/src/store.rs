//! 外部协作者接口
//!
//! 影像源、档案存储和时间序列存储由外部实现, 核心只依赖这些特征.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{QaImage, RegionResult, ScannerIdentity, ScannerProfile};

/// 影像源
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// 获取水位线之后的新影像. `None` 表示获取全部.
    async fn fetch_since(&self, watermark: Option<DateTime<Utc>>) -> Result<Vec<QaImage>>;

    /// 获取全部影像
    async fn fetch_all(&self) -> Result<Vec<QaImage>> {
        self.fetch_since(None).await
    }

    /// 影像数据总量 (字节)
    async fn total_size(&self) -> Result<u64>;
}

/// 扫描仪档案存储
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// 读取档案
    async fn get(&self, identity: &ScannerIdentity) -> Result<Option<ScannerProfile>>;

    /// 以默认值创建档案并立即持久化. 已存在时返回现有档案.
    async fn create_default(&self, identity: &ScannerIdentity) -> Result<ScannerProfile>;

    /// 更新 (或插入) 档案
    async fn update(&self, profile: ScannerProfile) -> Result<()>;

    /// 列出全部身份
    async fn keys(&self) -> Result<Vec<ScannerIdentity>>;

    /// 删除档案, 仅用于用户的显式编辑
    async fn remove(&self, identity: &ScannerIdentity) -> Result<Option<ScannerProfile>>;
}

/// 审计结果时间序列存储
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// 按日期写入, 同一天的旧结果被覆盖
    async fn upsert(
        &self,
        identity: &ScannerIdentity,
        date: NaiveDate,
        result: RegionResult,
    ) -> Result<()>;

    /// 读取一台扫描仪的全部结果, 按日期升序
    async fn load_all(&self, identity: &ScannerIdentity)
        -> Result<BTreeMap<NaiveDate, RegionResult>>;

    /// 列出有数据的扫描仪
    async fn scanners(&self) -> Result<Vec<ScannerIdentity>>;
}
