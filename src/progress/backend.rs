use std::collections::{HashMap, HashSet};
use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType};
use lazy_static::lazy_static;
use tracing::{debug, warn};

use super::config::ProgressConfig;
use super::error::Result;
use super::models::{TaskInfo, TaskOutcome, TaskSpec, TaskUpdate};
use super::render::{self, RenderLayout, SUMMARY_TOKEN, Snapshot};

const DEFAULT_TERMINAL_WIDTH: usize = 80;

lazy_static! {
    // 所有 spinner 共用同一个单调时钟起点
    static ref MONOTONIC_EPOCH: Instant = Instant::now();
}

fn monotonic_seconds() -> f64 {
    MONOTONIC_EPOCH.elapsed().as_secs_f64()
}

/// 标准输出是终端且 TERM 不是 dumb 时使用交互式重绘
pub fn detect_interactive() -> bool {
    io::stdout().is_terminal() && !matches!(std::env::var("TERM").as_deref(), Ok("dumb"))
}

fn detect_terminal_width() -> usize {
    if let Ok((width, _)) = crossterm::terminal::size() {
        if width > 0 {
            return width as usize;
        }
    }
    std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|w: &usize| *w > 0)
        .unwrap_or(DEFAULT_TERMINAL_WIDTH)
}

/// 任务表操作的结果，日志在释放锁之后再输出
enum Lookup {
    Applied,
    Finished,
    Unknown,
}

#[derive(Debug, Default)]
struct TaskTable {
    tasks: HashMap<String, TaskInfo>,
    order: Vec<String>,
    summary: Option<String>,
}

struct RenderState {
    output: Box<dyn Write + Send>,
    /// 交互模式：上一帧写出的行数
    lines_written: usize,
    /// 非交互模式：已经写出过的区块
    written_sections: HashSet<String>,
}

/// 文本进度后端
///
/// 任务表由同步锁保护，生产者可以在任意上下文中调用 add/update/finish；
/// 渲染由异步锁串行化，渲染时只在拷贝快照的瞬间持有任务表锁。
pub struct AsciiProgressBackend {
    table: Mutex<TaskTable>,
    render: tokio::sync::Mutex<RenderState>,
    config: ProgressConfig,
    interactive: bool,
    terminal_width: Option<usize>,
}

impl AsciiProgressBackend {
    pub fn new(config: ProgressConfig) -> Self {
        let interactive = detect_interactive();
        Self::with_output(config, Box::new(io::stdout()), interactive)
    }

    pub fn with_output(config: ProgressConfig, output: Box<dyn Write + Send>, interactive: bool) -> Self {
        Self {
            table: Mutex::new(TaskTable::default()),
            render: tokio::sync::Mutex::new(RenderState {
                output,
                lines_written: 0,
                written_sections: HashSet::new(),
            }),
            config,
            interactive,
            terminal_width: None,
        }
    }

    /// 固定终端宽度，不再探测
    pub fn with_terminal_width(mut self, width: usize) -> Self {
        self.terminal_width = Some(width);
        self
    }

    fn table(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_task(&self, task_id: &str, spec: &TaskSpec) {
        let replaced = {
            let mut table = self.table();
            let task = TaskInfo::new(task_id, spec);
            let replaced = table.tasks.insert(task_id.to_string(), task).is_some();
            if !replaced {
                table.order.push(task_id.to_string());
            }
            replaced
        };
        if replaced {
            debug!("任务已存在，重新注册: {}", task_id);
        }
    }

    pub fn update_task(&self, task_id: &str, update: TaskUpdate) {
        let status = {
            let mut table = self.table();
            match table.tasks.get_mut(task_id) {
                Some(task) if task.is_finished => Lookup::Finished,
                Some(task) => {
                    task.apply(update);
                    Lookup::Applied
                }
                None => Lookup::Unknown,
            }
        };
        match status {
            Lookup::Applied => {}
            Lookup::Finished => debug!("忽略已结束任务的更新: {}", task_id),
            Lookup::Unknown => warn!("更新未知任务: {}", task_id),
        }
    }

    pub fn finish_task(&self, task_id: &str, outcome: TaskOutcome, description: Option<String>) {
        let status = {
            let mut table = self.table();
            match table.tasks.get_mut(task_id) {
                Some(task) if task.is_finished => Lookup::Finished,
                Some(task) => {
                    task.finish(outcome, description);
                    Lookup::Applied
                }
                None => Lookup::Unknown,
            }
        };
        match status {
            Lookup::Applied => {}
            Lookup::Finished => debug!("任务已结束，忽略重复的结束调用: {}", task_id),
            Lookup::Unknown => warn!("结束未知任务: {}", task_id),
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<TaskInfo> {
        self.table().tasks.get(task_id).cloned()
    }

    /// 按添加顺序返回所有任务
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let table = self.table();
        table
            .order
            .iter()
            .filter_map(|id| table.tasks.get(id).cloned())
            .collect()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.table().order.clone()
    }

    pub fn set_summary(&self, summary: Option<String>) {
        self.table().summary = summary;
    }

    pub fn clear_tasks(&self) {
        let mut table = self.table();
        table.tasks.clear();
        table.order.clear();
        table.summary = None;
    }

    fn snapshot(&self) -> Snapshot {
        let table = self.table();
        Snapshot {
            tasks: table.tasks.clone(),
            order: table.order.clone(),
            summary: table.summary.clone(),
        }
    }

    fn layout(&self) -> RenderLayout {
        let width = self.terminal_width.unwrap_or_else(detect_terminal_width);
        RenderLayout::from_config(&self.config, width, self.interactive)
    }

    /// 组合当前状态的一帧文本，不写出
    pub fn render_frame(&self) -> Result<String> {
        let snapshot = self.snapshot();
        Ok(render::compose(&snapshot, &self.layout(), monotonic_seconds())?)
    }

    pub async fn render_once(&self) -> Result<()> {
        let mut state = self.render.lock().await;
        let frame = self.render_frame()?;
        self.write_frame(&mut state, &frame);
        Ok(())
    }

    /// 同步渲染一次；如果后台正在渲染则跳过
    pub fn render_now(&self) {
        let Ok(mut state) = self.render.try_lock() else {
            return;
        };
        match self.render_frame() {
            Ok(frame) => self.write_frame(&mut state, &frame),
            Err(e) => debug!("即时渲染失败: {}", e),
        }
    }

    /// 最后一次完整渲染，并重置输出记录，便于开始新的会话
    pub async fn cleanup(&self) {
        let mut state = self.render.lock().await;
        match self.render_frame() {
            Ok(frame) => self.write_frame(&mut state, &frame),
            Err(e) => debug!("最终渲染失败: {}", e),
        }
        state.lines_written = 0;
        state.written_sections.clear();
    }

    fn write_frame(&self, state: &mut RenderState, frame: &str) {
        if self.interactive {
            write_interactive(state, frame);
        } else {
            write_plain(state, frame);
        }
    }
}

fn write_interactive(state: &mut RenderState, frame: &str) {
    let mut buf = Vec::new();
    if let Err(e) = redraw_prefix(&mut buf, state.lines_written) {
        debug!("生成光标控制序列失败: {}", e);
        return;
    }
    if !frame.is_empty() {
        buf.extend_from_slice(frame.as_bytes());
        buf.push(b'\n');
    }

    write_best_effort(state.output.as_mut(), &buf);
    state.lines_written = if frame.is_empty() { 0 } else { frame.lines().count() };
}

/// 光标回到上一帧的第一行行首，并清除其后的全部内容
fn redraw_prefix(buf: &mut Vec<u8>, lines_written: usize) -> io::Result<()> {
    if lines_written > 0 {
        let lines = u16::try_from(lines_written).unwrap_or(u16::MAX);
        queue!(buf, MoveUp(lines))?;
    }
    queue!(buf, MoveToColumn(0), Clear(ClearType::FromCursorDown))
}

fn write_plain(state: &mut RenderState, frame: &str) {
    let mut buf = String::new();
    for section in frame.split("\n\n") {
        let section = section.trim_matches('\n');
        if section.trim().is_empty() {
            continue;
        }

        if state.written_sections.contains(section) {
            // 汇总行每次都输出
            for line in section.lines().filter(|line| line.contains(SUMMARY_TOKEN)) {
                buf.push_str(line);
                buf.push('\n');
            }
        } else {
            buf.push_str(section);
            buf.push('\n');
            state.written_sections.insert(section.to_string());
        }
    }

    if !buf.is_empty() {
        write_best_effort(state.output.as_mut(), buf.as_bytes());
    }
}

/// 终端写入失败（管道断开等）不影响正在进行的任务
fn write_best_effort(output: &mut (dyn Write + Send), bytes: &[u8]) {
    if let Err(e) = output.write_all(bytes).and_then(|_| output.flush()) {
        debug!("进度输出写入失败: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::models::ProgressType;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    fn backend(interactive: bool) -> (AsciiProgressBackend, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let backend =
            AsciiProgressBackend::with_output(ProgressConfig::default(), Box::new(buffer.clone()), interactive)
                .with_terminal_width(120);
        (backend, buffer)
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let (backend, _) = backend(false);
        backend.add_task("dl_1_a", &TaskSpec::new("a", ProgressType::Download).total(10));
        backend.update_task("missing", TaskUpdate::new().completed(5));
        backend.finish_task("missing", TaskOutcome::Success, None);

        let task = backend.get_task("dl_1_a").unwrap();
        assert_eq!(task.completed, 0);
        assert!(!task.is_finished);
        assert!(backend.get_task("missing").is_none());
    }

    /// 记录日志事件发生时任务表锁是否被占用
    struct TableLockCheck {
        backend: Arc<AsciiProgressBackend>,
        events: Arc<AtomicUsize>,
        logged_under_lock: Arc<AtomicBool>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TableLockCheck {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if self.backend.table.try_lock().is_err() {
                self.logged_under_lock.store(true, Ordering::SeqCst);
            }
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn logging_happens_after_table_lock_is_released() {
        use tracing_subscriber::prelude::*;

        let backend = Arc::new(backend(false).0);
        let events = Arc::new(AtomicUsize::new(0));
        let logged_under_lock = Arc::new(AtomicBool::new(false));
        let subscriber = tracing_subscriber::registry().with(TableLockCheck {
            backend: Arc::clone(&backend),
            events: Arc::clone(&events),
            logged_under_lock: Arc::clone(&logged_under_lock),
        });

        tracing::subscriber::with_default(subscriber, || {
            let spec = TaskSpec::new("a", ProgressType::Download).total(10);
            backend.add_task("dl_1_a", &spec);
            backend.add_task("dl_1_a", &spec);
            backend.update_task("missing", TaskUpdate::new().completed(1));
            backend.finish_task("missing", TaskOutcome::Success, None);
            backend.finish_task("dl_1_a", TaskOutcome::Success, None);
            backend.update_task("dl_1_a", TaskUpdate::new().completed(5));
            backend.finish_task("dl_1_a", TaskOutcome::Success, None);
        });

        assert!(events.load(Ordering::SeqCst) >= 5);
        assert!(!logged_under_lock.load(Ordering::SeqCst));
    }

    #[test]
    fn finished_tasks_ignore_updates() {
        let (backend, _) = backend(false);
        backend.add_task("dl_1_a", &TaskSpec::new("a", ProgressType::Download).total(10));
        backend.update_task("dl_1_a", TaskUpdate::new().completed(4));
        backend.finish_task("dl_1_a", TaskOutcome::Failure("boom".into()), None);
        backend.update_task("dl_1_a", TaskUpdate::new().completed(10));
        backend.finish_task("dl_1_a", TaskOutcome::Success, None);

        let task = backend.get_task("dl_1_a").unwrap();
        assert_eq!(task.completed, 4);
        assert_eq!(task.success, Some(false));
    }

    #[test]
    fn re_adding_keeps_single_order_slot() {
        let (backend, _) = backend(false);
        let spec = TaskSpec::new("a", ProgressType::Download).total(10);
        backend.add_task("dl_1_a", &spec);
        backend.add_task("dl_1_a", &spec);
        assert_eq!(backend.task_ids(), vec!["dl_1_a".to_string()]);
    }

    #[tokio::test]
    async fn plain_output_is_not_repeated() {
        let (backend, buffer) = backend(false);
        backend.add_task("install_1_App", &TaskSpec::new("App", ProgressType::Installation));

        backend.render_once().await.unwrap();
        let first = buffer.contents();
        backend.render_once().await.unwrap();
        assert_eq!(buffer.contents(), first);
        assert!(first.contains("Installing App"));
        assert!(!first.contains('\x1b'));
    }

    #[tokio::test]
    async fn summary_lines_are_always_written() {
        let (backend, buffer) = backend(false);
        backend.set_summary(Some("Summary: 1/1 operations succeeded, 0 failed".into()));

        backend.render_once().await.unwrap();
        backend.render_once().await.unwrap();
        assert_eq!(buffer.contents().matches("Summary:").count(), 2);
    }

    #[tokio::test]
    async fn plain_output_prints_changed_sections_only() {
        let (backend, buffer) = backend(false);
        backend.add_task("api_1_a", &TaskSpec::new("a", ProgressType::ApiFetching).total(1));
        backend.add_task("install_1_App", &TaskSpec::new("App", ProgressType::Installation));
        backend.render_once().await.unwrap();

        backend.finish_task("api_1_a", TaskOutcome::Success, None);
        backend.render_once().await.unwrap();

        let out = buffer.contents();
        assert_eq!(out.matches("Installing App").count(), 1);
        assert_eq!(out.matches("Fetching from API:").count(), 2);
        assert!(out.contains("Retrieved"));
    }

    #[tokio::test]
    async fn interactive_output_moves_cursor() {
        let (backend, buffer) = backend(true);
        backend.add_task("install_1_a", &TaskSpec::new("a", ProgressType::Installation));
        backend.add_task("install_2_b", &TaskSpec::new("b", ProgressType::Installation));

        backend.render_once().await.unwrap();
        assert!(!buffer.contents().contains("\x1b[2A"));

        backend.render_once().await.unwrap();
        assert!(buffer.contents().contains("\x1b[2A\x1b[1G\x1b[J"));
    }

    #[tokio::test]
    async fn cleanup_resets_bookkeeping() {
        let (backend, buffer) = backend(false);
        backend.add_task("install_1_App", &TaskSpec::new("App", ProgressType::Installation));
        backend.render_once().await.unwrap();
        backend.cleanup().await;
        backend.render_once().await.unwrap();

        assert_eq!(buffer.contents().matches("Installing App").count(), 2);
    }

    #[tokio::test]
    async fn write_errors_are_swallowed() {
        let backend =
            AsciiProgressBackend::with_output(ProgressConfig::default(), Box::new(BrokenPipe), true);
        backend.add_task("dl_1_a", &TaskSpec::new("a", ProgressType::Download).total(10));
        backend.render_once().await.unwrap();
        backend.render_now();
        backend.cleanup().await;
    }
}
