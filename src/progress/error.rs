use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("进度会话未激活，无法添加任务: {0}")]
    SessionNotActive(String),

    #[error("渲染输出失败: {0}")]
    Render(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, ProgressError>;
