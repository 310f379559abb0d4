use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info};
use url::Url;

use crate::progress::format::strip_package_extension;
use crate::progress::{ProgressReporter, TaskHandle, TaskOutcome, TaskUpdate};

pub mod download;
pub mod error;
pub mod record;
pub mod verify;

use download::DownloadService;
use error::{InstallError, Result};
use record::AppRecord;
use verify::ChecksumTable;

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub install_dir: PathBuf,
    /// 下载临时目录
    pub download_dir: PathBuf,
    pub concurrency: usize,
    pub verify: bool,
}

#[derive(Debug, Clone)]
pub struct InstalledApp {
    pub name: String,
    pub path: PathBuf,
    pub verified: bool,
}

/// 下载 → 校验 → 安装
pub struct AppInstaller {
    downloads: DownloadService,
    progress: ProgressReporter,
    options: InstallOptions,
}

impl AppInstaller {
    pub fn new(client: reqwest::Client, progress: ProgressReporter, options: InstallOptions) -> Self {
        Self {
            downloads: DownloadService::new(client, progress.clone()),
            progress,
            options,
        }
    }

    /// 并发安装多个应用，结果顺序与完成顺序一致
    pub async fn install_all(&self, urls: &[Url], checksums: &ChecksumTable) -> Vec<(Url, Result<InstalledApp>)> {
        futures::stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let result = self.install(&url, checksums).await;
                (url, result)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    pub async fn install(&self, url: &Url, checksums: &ChecksumTable) -> Result<InstalledApp> {
        let downloaded = self.downloads.download(url, &self.options.download_dir).await?;
        let file_name = download::file_name_from_url(url)?;
        self.install_downloaded(&downloaded, url.as_str(), checksums.get(&file_name))
            .await
    }

    /// 对已下载的文件执行校验和安装两个阶段
    pub async fn install_downloaded(
        &self,
        downloaded: &Path,
        source_url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<InstalledApp> {
        let file_name = downloaded
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| InstallError::InvalidUrl(downloaded.display().to_string()))?
            .to_string();
        let name = strip_package_extension(&file_name).to_string();

        let (verify_task, install_task) = self
            .progress
            .installation_workflow(&name, self.options.verify);

        let mut sha256 = None;
        let mut verified = false;
        if self.options.verify {
            match self.verify_phase(downloaded, expected_sha256, &verify_task).await {
                Ok(report) => {
                    verify_task.finish(report.outcome(), None);
                    verified = report.verified;
                    sha256 = Some(report.sha256);
                }
                Err(e) => {
                    verify_task.finish(TaskOutcome::Failure(e.to_string()), None);
                    install_task.finish(
                        TaskOutcome::Failure("skipped: verification failed".to_string()),
                        None,
                    );
                    return Err(e);
                }
            }
        }

        let record = AppRecord {
            name: name.clone(),
            file_name: file_name.clone(),
            source_url: source_url.to_string(),
            sha256,
            verified,
            installed_path: self.options.install_dir.join(&file_name),
            installed_at: Utc::now(),
        };

        match self.install_phase(downloaded, &record).await {
            Ok(()) => {
                install_task.finish(TaskOutcome::Success, None);
                info!("已安装 {} -> {}", name, record.installed_path.display());
                Ok(InstalledApp {
                    name,
                    path: record.installed_path,
                    verified,
                })
            }
            Err(e) => {
                install_task.finish(TaskOutcome::Failure(e.to_string()), None);
                Err(e)
            }
        }
    }

    async fn verify_phase(
        &self,
        downloaded: &Path,
        expected_sha256: Option<&str>,
        task: &TaskHandle,
    ) -> Result<verify::VerifyReport> {
        let size = tokio::fs::metadata(downloaded).await?.len();
        task.update(TaskUpdate::new().total(size));
        verify::verify_file(downloaded, expected_sha256, task).await
    }

    async fn install_phase(&self, downloaded: &Path, record: &AppRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.options.install_dir).await?;
        let target = &record.installed_path;

        // 跨文件系统时 rename 会失败，退回复制
        if let Err(e) = tokio::fs::rename(downloaded, target).await {
            debug!("重命名失败，改为复制: {}", e);
            tokio::fs::copy(downloaded, target).await?;
            tokio::fs::remove_file(downloaded).await?;
        }
        make_executable(target).await?;
        record.save(&self.options.install_dir).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(0o755);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
