//! JSON文件存储
//!
//! 档案保存在单个 JSON 文件中 (档案数组). 时间序列按扫描仪分目录保存:
//! `<根目录>/<存储键>/data.json`, 内容为
//! `{"Identity": {..}, "Homogeneity": {"YYYYMMDD": {..}}}`.
//! 写入先落到临时文件再重命名, 避免中断时留下半个文件.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use ctqa_core::utils::{format_dicom_date, parse_dicom_date};
use ctqa_core::{
    CtqaError, ProfileStore, RegionResult, Result, ScannerIdentity, ScannerProfile, SeriesStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 时间序列文件名
pub const SERIES_FILE_NAME: &str = "data.json";

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// 读取文件, 不存在时返回 `None`
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// JSON文件档案存储. 启动时整体加载, 每次修改整体写回.
pub struct JsonProfileStore {
    path: PathBuf,
    profiles: RwLock<BTreeMap<ScannerIdentity, ScannerProfile>>,
}

impl JsonProfileStore {
    /// 打开档案文件, 文件不存在时从空集合开始
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut profiles = BTreeMap::new();

        if let Some(data) = read_optional(&path).await? {
            let list: Vec<ScannerProfile> = serde_json::from_slice(&data).map_err(|e| {
                CtqaError::Store(format!("档案文件 {} 格式错误: {}", path.display(), e))
            })?;
            for profile in list {
                profiles.insert(profile.identity(), profile);
            }
        }

        info!("已加载 {} 个扫描仪档案: {}", profiles.len(), path.display());
        Ok(Self {
            path,
            profiles: RwLock::new(profiles),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, profiles: &BTreeMap<ScannerIdentity, ScannerProfile>) -> Result<()> {
        let list: Vec<&ScannerProfile> = profiles.values().collect();
        let data = serde_json::to_vec_pretty(&list)?;
        write_atomic(&self.path, &data).await.map_err(|e| {
            CtqaError::Store(format!("写入档案文件 {} 失败: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn get(&self, identity: &ScannerIdentity) -> Result<Option<ScannerProfile>> {
        Ok(self.profiles.read().await.get(identity).cloned())
    }

    async fn create_default(&self, identity: &ScannerIdentity) -> Result<ScannerProfile> {
        let mut profiles = self.profiles.write().await;
        if let Some(existing) = profiles.get(identity) {
            return Ok(existing.clone());
        }

        let profile = ScannerProfile::with_defaults(identity);
        profiles.insert(identity.clone(), profile.clone());
        if let Err(e) = self.save(&profiles).await {
            profiles.remove(identity);
            return Err(e);
        }
        Ok(profile)
    }

    async fn update(&self, profile: ScannerProfile) -> Result<()> {
        profile.validate()?;
        let mut profiles = self.profiles.write().await;
        let identity = profile.identity();
        let previous = profiles.insert(identity.clone(), profile);
        if let Err(e) = self.save(&profiles).await {
            match previous {
                Some(previous) => profiles.insert(identity, previous),
                None => profiles.remove(&identity),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<ScannerIdentity>> {
        Ok(self.profiles.read().await.keys().cloned().collect())
    }

    async fn remove(&self, identity: &ScannerIdentity) -> Result<Option<ScannerProfile>> {
        let mut profiles = self.profiles.write().await;
        let removed = profiles.remove(identity);
        if removed.is_some() {
            self.save(&profiles).await?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesDocument {
    #[serde(rename = "Identity")]
    identity: ScannerIdentity,
    #[serde(rename = "Homogeneity", default)]
    homogeneity: BTreeMap<String, RegionResult>,
}

/// JSON文件时间序列存储
pub struct JsonSeriesStore {
    root: PathBuf,
    /// 串行化读-改-写
    write_lock: Mutex<()>,
}

impl JsonSeriesStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn series_path(&self, identity: &ScannerIdentity) -> PathBuf {
        self.root.join(identity.storage_key()).join(SERIES_FILE_NAME)
    }

    async fn read_document(&self, path: &Path) -> Result<Option<SeriesDocument>> {
        match read_optional(path).await? {
            Some(data) => serde_json::from_slice(&data).map(Some).map_err(|e| {
                CtqaError::Store(format!("时间序列文件 {} 格式错误: {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SeriesStore for JsonSeriesStore {
    async fn upsert(
        &self,
        identity: &ScannerIdentity,
        date: NaiveDate,
        result: RegionResult,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.series_path(identity);

        let mut document = match self.read_document(&path).await? {
            Some(document) if document.identity == *identity => document,
            Some(document) => {
                return Err(CtqaError::Store(format!(
                    "存储键冲突: {} 已被 {} 占用",
                    path.display(),
                    document.identity
                )));
            }
            None => SeriesDocument {
                identity: identity.clone(),
                homogeneity: BTreeMap::new(),
            },
        };

        document.homogeneity.insert(format_dicom_date(date), result);
        let data = serde_json::to_vec_pretty(&document)?;
        write_atomic(&path, &data).await?;
        debug!("已写入时间序列: {} {}", identity, date);
        Ok(())
    }

    async fn load_all(
        &self,
        identity: &ScannerIdentity,
    ) -> Result<BTreeMap<NaiveDate, RegionResult>> {
        let path = self.series_path(identity);
        let Some(document) = self.read_document(&path).await? else {
            return Ok(BTreeMap::new());
        };

        let mut series = BTreeMap::new();
        for (key, result) in document.homogeneity {
            match parse_dicom_date(&key) {
                Some(date) => {
                    series.insert(date, result);
                }
                None => warn!("忽略无效日期键 {} ({})", key, path.display()),
            }
        }
        Ok(series)
    }

    async fn scanners(&self) -> Result<Vec<ScannerIdentity>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut scanners = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(SERIES_FILE_NAME);
            match self.read_document(&path).await {
                Ok(Some(document)) => scanners.push(document.identity),
                Ok(None) => {}
                Err(e) => warn!("跳过无法读取的时间序列: {}", e),
            }
        }
        scanners.sort();
        Ok(scanners)
    }
}
