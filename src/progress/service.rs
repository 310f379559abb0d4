//! 全局进度服务，以及向下游传递的空对象包装
//!
//! 命令入口建立会话后，把 [`ProgressReporter`] 通过构造函数传给下载、安装等模块；
//! 没有会话时 reporter 的所有操作都是空操作，调用方不需要判空。

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;
use tracing::debug;

use super::config::ProgressConfig;
use super::display::ProgressDisplay;
use super::models::{TaskOutcome, TaskSpec, TaskUpdate};

lazy_static! {
    static ref PROGRESS_SERVICE: RwLock<Option<Arc<ProgressDisplay>>> = RwLock::new(None);
}

pub fn get_progress_service() -> Option<Arc<ProgressDisplay>> {
    PROGRESS_SERVICE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn set_progress_service(service: Option<Arc<ProgressDisplay>>) {
    *PROGRESS_SERVICE
        .write()
        .unwrap_or_else(PoisonError::into_inner) = service;
}

/// 使用全局进度服务执行 `body`，不存在时按默认配置创建并注册
pub async fn progress_session<F, Fut, T>(total_operations: usize, body: F) -> T
where
    F: FnOnce(ProgressReporter) -> Fut,
    Fut: Future<Output = T>,
{
    let display = {
        let mut slot = PROGRESS_SERVICE
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(|| Arc::new(ProgressDisplay::new(ProgressConfig::default())))
            .clone()
    };

    display
        .session(total_operations, |display| body(ProgressReporter::new(display)))
        .await
}

/// 进度上报入口，可能没有绑定任何会话
#[derive(Clone, Default)]
pub struct ProgressReporter {
    display: Option<Arc<ProgressDisplay>>,
}

impl ProgressReporter {
    pub fn new(display: Arc<ProgressDisplay>) -> Self {
        Self {
            display: Some(display),
        }
    }

    /// 不显示任何进度
    pub fn disabled() -> Self {
        Self { display: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.display.as_ref().is_some_and(|d| d.is_active())
    }

    pub fn add_task(&self, spec: TaskSpec) -> TaskHandle {
        let Some(display) = self.display.as_ref() else {
            return TaskHandle::detached();
        };
        match display.add_task(spec) {
            Ok(task_id) => TaskHandle {
                display: Some(Arc::clone(display)),
                task_id: Some(task_id),
            },
            Err(e) => {
                debug!("进度任务未创建: {}", e);
                TaskHandle::detached()
            }
        }
    }

    /// 校验+安装两阶段任务；关闭校验时第一个句柄为空操作
    pub fn installation_workflow(&self, name: &str, with_verification: bool) -> (TaskHandle, TaskHandle) {
        let Some(display) = self.display.as_ref() else {
            return (TaskHandle::detached(), TaskHandle::detached());
        };
        match display.create_installation_workflow(name, with_verification) {
            Ok((verify_id, install_id)) => (
                TaskHandle {
                    display: verify_id.as_ref().map(|_| Arc::clone(display)),
                    task_id: verify_id,
                },
                TaskHandle {
                    display: Some(Arc::clone(display)),
                    task_id: Some(install_id),
                },
            ),
            Err(e) => {
                debug!("安装流程任务未创建: {}", e);
                (TaskHandle::detached(), TaskHandle::detached())
            }
        }
    }
}

/// 单个任务的句柄，未绑定任务时所有操作为空操作
#[derive(Clone, Default)]
pub struct TaskHandle {
    display: Option<Arc<ProgressDisplay>>,
    task_id: Option<String>,
}

impl TaskHandle {
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn update(&self, update: TaskUpdate) {
        if let (Some(display), Some(task_id)) = (&self.display, &self.task_id) {
            display.update_task(task_id, update);
        }
    }

    pub fn set_completed(&self, completed: u64) {
        self.update(TaskUpdate::new().completed(completed));
    }

    pub fn finish(&self, outcome: impl Into<TaskOutcome>, description: Option<String>) {
        if let (Some(display), Some(task_id)) = (&self.display, &self.task_id) {
            display.finish_task(task_id, outcome, description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::models::ProgressType;

    #[test]
    fn disabled_reporter_is_noop() {
        let reporter = ProgressReporter::disabled();
        assert!(!reporter.is_enabled());

        let handle = reporter.add_task(TaskSpec::new("app", ProgressType::Download).total(10));
        assert!(handle.id().is_none());
        handle.set_completed(5);
        handle.finish(true, None);

        let (verify, install) = reporter.installation_workflow("app", true);
        verify.finish(TaskOutcome::SuccessWithWarning("not verified".into()), None);
        install.finish(false, None);
    }

    #[test]
    fn inactive_display_yields_detached_handles() {
        let display = Arc::new(ProgressDisplay::new(ProgressConfig::default()));
        let reporter = ProgressReporter::new(display);
        assert!(!reporter.is_enabled());

        let handle = reporter.add_task(TaskSpec::new("app", ProgressType::Download));
        assert!(handle.id().is_none());
    }
}
