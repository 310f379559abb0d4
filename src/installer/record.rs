use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::Result;

const RECORD_DIR: &str = ".appim";

/// 每个已安装应用一份记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppRecord {
    pub name: String,
    pub file_name: String,
    pub source_url: String,
    pub sha256: Option<String>,
    pub verified: bool,
    pub installed_path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

impl AppRecord {
    pub fn record_path(install_dir: &Path, name: &str) -> PathBuf {
        install_dir.join(RECORD_DIR).join(format!("{}.json", name))
    }

    pub async fn save(&self, install_dir: &Path) -> Result<PathBuf> {
        let path = Self::record_path(install_dir, &self.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// 读取全部记录，按名称排序；无法解析的记录跳过
    pub async fn load_all(install_dir: &Path) -> Result<Vec<AppRecord>> {
        let dir = install_dir.join(RECORD_DIR);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<AppRecord>(&data) {
                Ok(record) => records.push(record),
                Err(e) => warn!("跳过无法解析的记录 {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
