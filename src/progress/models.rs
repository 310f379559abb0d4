use std::time::Instant;

/// 进度任务类型，创建后不可更改，决定任务落在哪个渲染区块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressType {
    ApiFetching,
    Download,
    Verification,
    IconExtraction,
    Installation,
    Update,
}

/// 渲染区块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    ApiFetching,
    Downloads,
    Processing,
}

impl ProgressType {
    /// 任务ID前缀
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ProgressType::ApiFetching => "api",
            ProgressType::Download => "dl",
            ProgressType::Verification => "verify",
            ProgressType::IconExtraction => "icon",
            ProgressType::Installation => "install",
            ProgressType::Update => "update",
        }
    }

    /// 处理区块中显示的动作
    pub fn verb(&self) -> &'static str {
        match self {
            ProgressType::ApiFetching => "Fetching",
            ProgressType::Download => "Downloading",
            ProgressType::Verification => "Verifying",
            ProgressType::IconExtraction => "Extracting icon",
            ProgressType::Installation => "Installing",
            ProgressType::Update => "Updating",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ProgressType::ApiFetching => "🌐",
            ProgressType::Download => "📦",
            ProgressType::Verification => "🔍",
            ProgressType::IconExtraction => "🎨",
            ProgressType::Installation => "📁",
            ProgressType::Update => "🔄",
        }
    }

    pub fn default_description(&self) -> String {
        format!("{} {}", self.icon(), self.verb())
    }

    pub fn section(&self) -> Section {
        match self {
            ProgressType::ApiFetching => Section::ApiFetching,
            ProgressType::Download => Section::Downloads,
            ProgressType::Verification
            | ProgressType::IconExtraction
            | ProgressType::Installation
            | ProgressType::Update => Section::Processing,
        }
    }
}

/// 任务的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// 成功但存在需要提示的问题，例如未能校验
    SuccessWithWarning(String),
    Failure(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, TaskOutcome::Failure(_))
    }
}

impl From<bool> for TaskOutcome {
    fn from(success: bool) -> Self {
        if success {
            TaskOutcome::Success
        } else {
            TaskOutcome::Failure(String::new())
        }
    }
}

/// 添加任务所需的参数
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub progress_type: ProgressType,
    pub total: u64,
    pub description: Option<String>,
    pub parent_task_id: Option<String>,
    pub phase: u32,
    pub total_phases: u32,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, progress_type: ProgressType) -> Self {
        Self {
            name: name.into(),
            progress_type,
            total: 0,
            description: None,
            parent_task_id: None,
            phase: 1,
            total_phases: 1,
        }
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn phase(mut self, phase: u32, total_phases: u32) -> Self {
        self.phase = phase;
        self.total_phases = total_phases;
        self
    }
}

/// 对任务的部分更新，未设置的字段保持不变
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub completed: Option<u64>,
    pub total: Option<u64>,
    pub description: Option<String>,
    pub speed: Option<f64>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(mut self, completed: u64) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub task_id: String,
    pub name: String,
    pub progress_type: ProgressType,
    pub completed: u64,
    pub total: u64,
    pub description: String,
    pub is_finished: bool,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub warning_message: Option<String>,
    pub created_at: Instant,
    pub last_update: Instant,
    pub parent_task_id: Option<String>,
    pub phase: u32,
    pub total_phases: u32,
    /// 字节/秒，仅下载任务使用
    pub current_speed: f64,
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, spec: &TaskSpec) -> Self {
        let now = Instant::now();
        // 阶段从1开始，且不超过总阶段数
        let phase = spec.phase.max(1);
        let total_phases = spec.total_phases.max(phase);

        Self {
            task_id: task_id.into(),
            name: spec.name.clone(),
            progress_type: spec.progress_type,
            completed: 0,
            total: spec.total,
            description: spec
                .description
                .clone()
                .unwrap_or_else(|| spec.progress_type.default_description()),
            is_finished: false,
            success: None,
            error_message: None,
            warning_message: None,
            created_at: now,
            last_update: now,
            parent_task_id: spec.parent_task_id.clone(),
            phase,
            total_phases,
            current_speed: 0.0,
        }
    }

    pub fn apply(&mut self, update: TaskUpdate) {
        if let Some(total) = update.total {
            self.total = total;
        }
        if let Some(completed) = update.completed {
            self.completed = completed;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(speed) = update.speed {
            self.current_speed = speed;
        }
        self.last_update = Instant::now();
    }

    /// 标记任务结束，只会生效一次
    pub fn finish(&mut self, outcome: TaskOutcome, description: Option<String>) {
        if self.is_finished {
            return;
        }
        self.is_finished = true;
        self.success = Some(outcome.is_success());
        match outcome {
            TaskOutcome::Success => {}
            TaskOutcome::SuccessWithWarning(reason) => {
                self.warning_message = Some(reason);
            }
            TaskOutcome::Failure(reason) => {
                let message = if reason.is_empty() {
                    description.clone().unwrap_or_else(|| "Failed".to_string())
                } else {
                    reason
                };
                self.error_message = Some(message);
            }
        }
        if let Some(description) = description {
            self.description = description;
        }
        self.last_update = Instant::now();
    }

    pub fn is_failed(&self) -> bool {
        self.is_finished && self.success == Some(false)
    }

    pub fn has_warning(&self) -> bool {
        self.is_finished && self.success == Some(true) && self.warning_message.is_some()
    }

    /// 剩余秒数，速度未知时返回 None
    pub fn eta_seconds(&self) -> Option<f64> {
        if self.current_speed <= 0.0 || self.total == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.completed);
        Some(remaining as f64 / self.current_speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_is_clamped_into_range() {
        let spec = TaskSpec::new("App", ProgressType::Installation).phase(0, 0);
        let task = TaskInfo::new("install_1_App", &spec);
        assert_eq!(task.phase, 1);
        assert_eq!(task.total_phases, 1);

        let spec = TaskSpec::new("App", ProgressType::Installation).phase(3, 2);
        let task = TaskInfo::new("install_1_App", &spec);
        assert_eq!(task.phase, 3);
        assert_eq!(task.total_phases, 3);
    }

    #[test]
    fn finish_is_applied_only_once() {
        let spec = TaskSpec::new("App", ProgressType::Verification);
        let mut task = TaskInfo::new("verify_1_App", &spec);

        task.finish(TaskOutcome::Failure("checksum mismatch".into()), None);
        task.finish(TaskOutcome::Success, Some("done".into()));

        assert!(task.is_failed());
        assert_eq!(task.error_message.as_deref(), Some("checksum mismatch"));
        assert_ne!(task.description, "done");
    }

    #[test]
    fn failure_without_reason_uses_description() {
        let spec = TaskSpec::new("App", ProgressType::Download);
        let mut task = TaskInfo::new("dl_1_App", &spec);
        task.finish(false.into(), Some("connection reset".into()));
        assert_eq!(task.error_message.as_deref(), Some("connection reset"));
    }

    #[test]
    fn warning_outcome_counts_as_success() {
        let spec = TaskSpec::new("App", ProgressType::Verification);
        let mut task = TaskInfo::new("verify_1_App", &spec);
        task.finish(TaskOutcome::SuccessWithWarning("not verified".into()), None);
        assert_eq!(task.success, Some(true));
        assert!(task.has_warning());
    }
}
