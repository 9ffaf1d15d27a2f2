//! 目录影像源
//!
//! 递归扫描目录下的文件, 按文件修改时间与水位线比较实现增量获取.
//! 无法解码的文件记录日志后跳过.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctqa_core::{CtqaError, ImageSource, QaImage, Result};
use tracing::{debug, info, warn};

use crate::parser::decode_file;

/// 目录中的文件条目
#[derive(Debug, Clone)]
struct FileEntry {
    path: PathBuf,
    modified: DateTime<Utc>,
    size: u64,
}

fn collect_files(root: &Path) -> std::io::Result<Vec<FileEntry>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push(FileEntry {
                    path: entry.path(),
                    modified: DateTime::<Utc>::from(modified),
                    size: metadata.len(),
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// DICOM目录影像源
#[derive(Debug, Clone)]
pub struct DicomDirectorySource {
    root: PathBuf,
}

impl DicomDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn list(&self) -> Result<Vec<FileEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                warn!("影像目录不存在: {}", root.display());
                return Ok(Vec::new());
            }
            collect_files(&root).map_err(CtqaError::from)
        })
        .await
        .map_err(|e| CtqaError::Internal(format!("目录扫描任务异常: {}", e)))?
    }
}

#[async_trait]
impl ImageSource for DicomDirectorySource {
    async fn fetch_since(&self, watermark: Option<DateTime<Utc>>) -> Result<Vec<QaImage>> {
        let files: Vec<FileEntry> = self
            .list()
            .await?
            .into_iter()
            .filter(|f| watermark.map_or(true, |mark| f.modified > mark))
            .collect();
        info!(
            "从 {} 获取 {} 个新文件 (水位线 {:?})",
            self.root.display(),
            files.len(),
            watermark
        );

        tokio::task::spawn_blocking(move || {
            files
                .iter()
                .filter_map(|file| match decode_file(&file.path) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        warn!("跳过无法解码的文件 {}: {}", file.path.display(), e);
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CtqaError::Internal(format!("影像解码任务异常: {}", e)))
    }

    async fn total_size(&self) -> Result<u64> {
        let total = self.list().await?.iter().map(|f| f.size).sum();
        debug!("影像目录总大小: {} bytes", total);
        Ok(total)
    }
}
