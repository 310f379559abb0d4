use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::error::{InstallError, Result};
use crate::progress::{TaskHandle, TaskOutcome};

pub const NOT_VERIFIED: &str = "checksum not available, not verified";

const READ_BUFFER_SIZE: usize = 64 * 1024;

lazy_static! {
    // sha256sum 输出格式: "<hex>  <文件名>"，二进制模式文件名前带 '*'
    static ref CHECKSUM_LINE: Regex = Regex::new(r"^([0-9a-fA-F]{64})\s+\*?(.+?)\s*$").unwrap();
}

/// 发布页附带的 SHA256SUMS 文件
#[derive(Debug, Clone, Default)]
pub struct ChecksumTable {
    entries: HashMap<String, String>,
}

impl ChecksumTable {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let captures = CHECKSUM_LINE
                .captures(line)
                .ok_or_else(|| InstallError::InvalidChecksumFile(line.to_string()))?;
            entries.insert(captures[2].to_string(), captures[1].to_lowercase());
        }
        Ok(Self { entries })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub sha256: String,
    pub verified: bool,
}

impl VerifyReport {
    pub fn outcome(&self) -> TaskOutcome {
        if self.verified {
            TaskOutcome::Success
        } else {
            TaskOutcome::SuccessWithWarning(NOT_VERIFIED.to_string())
        }
    }
}

/// 计算文件的 SHA-256，每读一块更新一次进度
pub async fn sha256_file(path: &Path, task: &TaskHandle) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut processed = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        processed += n as u64;
        task.set_completed(processed);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 没有期望值时返回未校验的报告；不匹配返回错误
pub async fn verify_file(path: &Path, expected: Option<&str>, task: &TaskHandle) -> Result<VerifyReport> {
    let actual = sha256_file(path, task).await?;

    let Some(expected) = expected else {
        debug!("没有可用的校验值: {}", path.display());
        return Ok(VerifyReport {
            sha256: actual,
            verified: false,
        });
    };

    if expected.eq_ignore_ascii_case(&actual) {
        Ok(VerifyReport {
            sha256: actual,
            verified: true,
        })
    } else {
        Err(InstallError::ChecksumMismatch {
            expected: expected.to_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello world")
    const HELLO_SHA: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn parses_sha256sums() {
        let text = format!(
            "# release checksums\n{}  App-x86_64.AppImage\n{} *Other.AppImage\n\n",
            HELLO_SHA,
            HELLO_SHA.to_uppercase()
        );
        let table = ChecksumTable::parse(&text).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("App-x86_64.AppImage"), Some(HELLO_SHA));
        assert_eq!(table.get("Other.AppImage"), Some(HELLO_SHA));
        assert_eq!(table.get("missing"), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = ChecksumTable::parse("not-a-checksum file").unwrap_err();
        assert!(matches!(err, InstallError::InvalidChecksumFile(_)));
    }

    #[tokio::test]
    async fn verify_matches_and_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.AppImage");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        let task = TaskHandle::detached();

        let report = verify_file(&path, Some(HELLO_SHA), &task).await.unwrap();
        assert!(report.verified);
        assert_eq!(report.outcome(), TaskOutcome::Success);

        let report = verify_file(&path, None, &task).await.unwrap();
        assert!(!report.verified);
        assert!(matches!(report.outcome(), TaskOutcome::SuccessWithWarning(_)));

        let wrong = "0".repeat(64);
        let err = verify_file(&path, Some(&wrong), &task).await.unwrap_err();
        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));
    }
}
