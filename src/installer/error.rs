use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("HTTP错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("请求失败，状态码: {status}，URL: {url}")]
    BadStatus { status: u16, url: String },

    #[error("访问受限 ({0})，请稍后重试")]
    RateLimited(String),

    #[error("下载中断: {0}")]
    StreamError(String),

    #[error("校验失败: 期望 {expected}，实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("校验文件格式错误: {0}")]
    InvalidChecksumFile(String),

    #[error("记录文件错误: {0}")]
    RecordError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InstallError>;
