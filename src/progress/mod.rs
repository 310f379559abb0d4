pub mod backend;
pub mod config;
pub mod display;
pub mod error;
pub mod format;
pub mod models;
pub mod render;
pub mod service;
pub mod speed;
pub mod task_id;

pub use backend::AsciiProgressBackend;
pub use config::ProgressConfig;
pub use display::ProgressDisplay;
pub use error::ProgressError;
pub use models::{ProgressType, TaskInfo, TaskOutcome, TaskSpec, TaskUpdate};
pub use service::{
    ProgressReporter, TaskHandle, get_progress_service, progress_session, set_progress_service,
};
