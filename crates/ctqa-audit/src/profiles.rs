//! 扫描仪档案解析
//!
//! 首次见到的扫描仪会以默认值自动创建档案并立即持久化.

use std::sync::Arc;

use ctqa_core::{ProfileStore, QaImage, Result, ScannerIdentity, ScannerProfile};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 解析结果
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub profile: ScannerProfile,
    /// 是否为本次新建的档案, 需要人工复核默认控制限
    pub newly_created: bool,
}

/// 档案解析器
pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    /// 串行化 "查询-创建" 路径, 保证同一身份最多一个写入者
    provision_lock: Mutex<()>,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            provision_lock: Mutex::new(()),
        }
    }

    /// 底层档案存储
    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// 获取档案, 不存在时以默认值创建.
    ///
    /// 在没有外部编辑的情况下重复解析同一身份返回相同的档案.
    pub async fn resolve(&self, identity: &ScannerIdentity) -> Result<ResolvedProfile> {
        let _guard = self.provision_lock.lock().await;

        if let Some(profile) = self.store.get(identity).await? {
            debug!("已找到扫描仪档案: {}", identity);
            return Ok(ResolvedProfile {
                profile,
                newly_created: false,
            });
        }

        warn!("未找到扫描仪 {} 的档案, 正在创建默认档案 (控制限需要人工复核)", identity);
        let profile = self.store.create_default(identity).await?;
        Ok(ResolvedProfile {
            profile,
            newly_created: true,
        })
    }

    /// 遍历影像, 为所有未知扫描仪创建档案而不执行审计.
    ///
    /// 返回新建的身份, 按首次出现顺序去重.
    pub async fn provision_all(&self, images: &[QaImage]) -> Result<Vec<ScannerIdentity>> {
        let mut created = Vec::new();
        for image in images {
            let Some(identity) = image.identity() else {
                warn!("影像缺少身份字段, 跳过: {}", image.summary());
                continue;
            };
            if created.contains(&identity) {
                continue;
            }
            if self.resolve(&identity).await?.newly_created {
                created.push(identity);
            }
        }
        Ok(created)
    }
}
