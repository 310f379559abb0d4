use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use super::error::{InstallError, Result};
use crate::progress::{ProgressReporter, ProgressType, TaskHandle, TaskOutcome, TaskSpec};

/// 流式下载 AppImage 资源，并向进度服务汇报
#[derive(Clone)]
pub struct DownloadService {
    client: reqwest::Client,
    progress: ProgressReporter,
}

impl DownloadService {
    pub fn new(client: reqwest::Client, progress: ProgressReporter) -> Self {
        Self { client, progress }
    }

    /// 下载到 `dest_dir`，返回最终文件路径
    ///
    /// 先写入临时文件，完成后再重命名，失败时删除临时文件
    pub async fn download(&self, url: &Url, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = file_name_from_url(url)?;
        let output_path = dest_dir.join(&file_name);
        let temp_path = dest_dir.join(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4()));

        tokio::fs::create_dir_all(dest_dir).await?;

        let response = self.client.get(url.clone()).send().await?;
        check_response_status(&response, url.as_str())?;
        let total_size = response.content_length().unwrap_or(0);

        let task = self
            .progress
            .add_task(TaskSpec::new(&file_name, ProgressType::Download).total(total_size));

        debug!("开始下载: {} -> {}", url, output_path.display());
        let result = match self.stream_to_file(response, &temp_path, &task).await {
            Ok(downloaded) => tokio::fs::rename(&temp_path, &output_path)
                .await
                .map(|_| downloaded)
                .map_err(InstallError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(downloaded) => {
                task.finish(TaskOutcome::Success, None);
                debug!("下载完成: {} ({} 字节)", output_path.display(), downloaded);
                Ok(output_path)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&temp_path).await {
                    debug!("清理临时文件失败: {}", remove_err);
                }
                task.finish(TaskOutcome::Failure(e.to_string()), None);
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        path: &Path,
        task: &TaskHandle,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();

        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| InstallError::StreamError(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            task.set_completed(downloaded);
        }
        file.flush().await?;

        Ok(downloaded)
    }
}

/// 取 URL 最后一段作为文件名
pub fn file_name_from_url(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(|name| {
            urlencoding::decode(name)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| name.to_string())
        })
        .ok_or_else(|| InstallError::InvalidUrl(url.to_string()))
}

// 检查响应状态并处理特殊情况
fn check_response_status(response: &reqwest::Response, url: &str) -> Result<()> {
    let status = response.status();
    debug!("Response Status: {}", status);

    match status {
        reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::TOO_MANY_REQUESTS => {
            warn!("🚫 请求被限制 ({})，URL: {}", status, url);
            Err(InstallError::RateLimited(status.to_string()))
        }
        status if status.is_success() => Ok(()),
        _ => {
            warn!("❌ 非成功状态码: {}", status);
            Err(InstallError::BadStatus {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_segment() {
        let url = Url::parse("https://github.com/o/r/releases/download/v1.0/App-x86_64.AppImage").unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "App-x86_64.AppImage");
    }

    #[test]
    fn file_name_is_decoded() {
        let url = Url::parse("https://example.com/dl/My%20App.AppImage").unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "My App.AppImage");
    }

    #[test]
    fn url_without_file_is_rejected() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(matches!(file_name_from_url(&url), Err(InstallError::InvalidUrl(_))));
    }
}
