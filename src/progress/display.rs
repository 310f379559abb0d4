use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;

use crate::common::logger;

use super::backend::AsciiProgressBackend;
use super::config::ProgressConfig;
use super::error::{ProgressError, Result};
use super::models::{ProgressType, TaskInfo, TaskOutcome, TaskSpec, TaskUpdate};
use super::render::SUMMARY_TOKEN;
use super::speed::SpeedTracker;
use super::task_id::TaskIdGenerator;

#[derive(Default)]
struct SessionState {
    render_task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    saved_log_level: Option<LevelFilter>,
    total_operations: usize,
}

/// 进度会话与任务生命周期的入口
///
/// 其他模块只通过这里添加、更新、结束任务；后台循环按固定频率调用后端渲染
pub struct ProgressDisplay {
    backend: Arc<AsciiProgressBackend>,
    config: ProgressConfig,
    active: AtomicBool,
    session: tokio::sync::Mutex<SessionState>,
    ids: Mutex<TaskIdGenerator>,
    speeds: Mutex<HashMap<String, SpeedTracker>>,
}

impl ProgressDisplay {
    pub fn new(config: ProgressConfig) -> Self {
        let backend = Arc::new(AsciiProgressBackend::new(config.clone()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: ProgressConfig, backend: Arc<AsciiProgressBackend>) -> Self {
        Self {
            backend,
            ids: Mutex::new(TaskIdGenerator::new(config.task_id_cache_size)),
            speeds: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
            session: tokio::sync::Mutex::new(SessionState::default()),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<AsciiProgressBackend> {
        &self.backend
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 后台渲染任务是否仍在运行
    pub async fn is_rendering(&self) -> bool {
        let session = self.session.lock().await;
        session
            .render_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn ids(&self) -> MutexGuard<'_, TaskIdGenerator> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn speeds(&self) -> MutexGuard<'_, HashMap<String, SpeedTracker>> {
        self.speeds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn start_session(&self, total_operations: usize) {
        let mut session = self.session.lock().await;
        if self.is_active() {
            warn!("进度会话已经激活，忽略重复启动");
            return;
        }

        // 会话期间只保留 WARN 以上的控制台日志，避免和进度输出交错
        session.saved_log_level = logger::suppress_console(LevelFilter::WARN);
        session.total_operations = total_operations;

        let cancel = CancellationToken::new();
        session.render_task = Some(tokio::spawn(render_loop(
            Arc::clone(&self.backend),
            self.config.refresh_interval(),
            cancel.clone(),
        )));
        session.cancel = Some(cancel);
        self.active.store(true, Ordering::SeqCst);
        debug!("进度会话已启动，操作总数: {}", total_operations);
    }

    pub async fn stop_session(&self) {
        let mut session = self.session.lock().await;
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(cancel) = session.cancel.take() {
            cancel.cancel();
        }
        // 等渲染循环完全退出后再做最终渲染
        if let Some(task) = session.render_task.take() {
            if let Err(e) = task.await {
                debug!("渲染循环异常退出: {}", e);
            }
        }

        if session.total_operations > 0 {
            self.backend
                .set_summary(Some(self.summary_line(session.total_operations)));
        }
        self.backend.cleanup().await;
        self.backend.clear_tasks();

        if let Some(level) = session.saved_log_level.take() {
            logger::restore_console(level);
        }
        session.total_operations = 0;
        self.ids().clear();
        self.speeds().clear();
        debug!("进度会话已结束");
    }

    /// 在会话中执行 `body`，无论成功、失败还是 panic 都会结束会话
    pub async fn session<F, Fut, T>(self: &Arc<Self>, total_operations: usize, body: F) -> T
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.start_session(total_operations).await;
        let result = AssertUnwindSafe(body(Arc::clone(self))).catch_unwind().await;
        self.stop_session().await;
        match result {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub fn add_task(&self, spec: TaskSpec) -> Result<String> {
        if !self.is_active() {
            return Err(ProgressError::SessionNotActive(spec.name));
        }

        let task_id = self.ids().generate(spec.progress_type, &spec.name);
        self.backend.add_task(&task_id, &spec);

        if spec.progress_type == ProgressType::Download {
            self.speeds().insert(
                task_id.clone(),
                SpeedTracker::new(self.config.speed_history_size, self.config.min_speed_interval),
            );
        }

        // 立即渲染一次，保证很快结束的阶段也能被看到
        self.backend.render_now();
        Ok(task_id)
    }

    pub fn update_task(&self, task_id: &str, update: TaskUpdate) {
        self.update_task_at(task_id, update, Instant::now());
    }

    fn update_task_at(&self, task_id: &str, mut update: TaskUpdate, now: Instant) {
        if let Some(completed) = update.completed {
            if let Some(tracker) = self.speeds().get_mut(task_id) {
                update.speed = Some(tracker.record(now, completed));
            }
        }
        self.backend.update_task(task_id, update);
    }

    pub fn finish_task(&self, task_id: &str, outcome: impl Into<TaskOutcome>, description: Option<String>) {
        let outcome = outcome.into();
        if outcome.is_success() {
            // 成功时进度条必须到 100%
            if let Some(task) = self.backend.get_task(task_id) {
                if task.total > 0 && !task.is_finished {
                    self.backend
                        .update_task(task_id, TaskUpdate::new().completed(task.total));
                }
            }
        }
        self.backend.finish_task(task_id, outcome, description);
    }

    pub fn get_task_info(&self, task_id: &str) -> Option<TaskInfo> {
        self.backend.get_task(task_id)
    }

    pub fn create_api_fetching_task(&self, name: &str, total: u64) -> Result<String> {
        self.add_task(
            TaskSpec::new(name, ProgressType::ApiFetching)
                .total(total)
                .description("Fetching release information"),
        )
    }

    pub fn create_download_task(&self, file_name: &str, total_bytes: u64) -> Result<String> {
        self.add_task(TaskSpec::new(file_name, ProgressType::Download).total(total_bytes))
    }

    /// 创建校验+安装两个阶段的任务，跳过校验时只创建安装任务
    ///
    /// 返回 (校验任务ID, 安装任务ID)
    pub fn create_installation_workflow(
        &self,
        name: &str,
        with_verification: bool,
    ) -> Result<(Option<String>, String)> {
        if !with_verification {
            let install_id = self.add_task(
                TaskSpec::new(name, ProgressType::Installation)
                    .phase(1, 1)
                    .description(format!("Installing {}", name)),
            )?;
            return Ok((None, install_id));
        }

        let verify_id = self.add_task(
            TaskSpec::new(name, ProgressType::Verification)
                .phase(1, 2)
                .description(format!("Verifying {}", name)),
        )?;
        let install_id = self.add_task(
            TaskSpec::new(name, ProgressType::Installation)
                .phase(2, 2)
                .parent(verify_id.clone())
                .description(format!("Installing {}", name)),
        )?;
        Ok((Some(verify_id), install_id))
    }

    /// 安装/更新类任务的完成情况
    fn summary_line(&self, total_operations: usize) -> String {
        let operations: Vec<TaskInfo> = self
            .backend
            .tasks()
            .into_iter()
            .filter(|t| {
                matches!(t.progress_type, ProgressType::Installation | ProgressType::Update)
            })
            .collect();
        let succeeded = operations.iter().filter(|t| t.success == Some(true)).count();
        let failed = operations.iter().filter(|t| t.is_failed()).count();
        format!(
            "{} {}/{} operations succeeded, {} failed",
            SUMMARY_TOKEN, succeeded, total_operations, failed
        )
    }
}

async fn render_loop(backend: Arc<AsciiProgressBackend>, interval: Duration, cancel: CancellationToken) {
    loop {
        if let Err(e) = backend.render_once().await {
            debug!("渲染失败，下一轮重试: {}", e);
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
