//! 把任务快照组合成一帧文本，不做任何 I/O

use std::collections::HashMap;
use std::fmt::{self, Write};

use indexmap::IndexMap;

use super::config::ProgressConfig;
use super::format::{
    ETA_PLACEHOLDER, create_bar, display_width, format_bytes, format_eta, format_percentage,
    format_speed, pad_to_width, strip_package_extension, truncate_text,
};
use super::models::{Section, TaskInfo};

pub const SUMMARY_TOKEN: &str = "Summary:";

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const GLYPH_RUNNING: &str = " ";
const GLYPH_SUCCESS: &str = "✓";
const GLYPH_FAILURE: &str = "✗";
const GLYPH_WARNING: &str = "⚠";

const INDENT: &str = "  ";
const DETAIL_INDENT: &str = "    ";

const SIZE_WIDTH: usize = 21;
const SPEED_WIDTH: usize = 10;
const ETA_WIDTH: usize = 7;
const PERCENT_WIDTH: usize = 4;
const MIN_BAR_WIDTH: usize = 10;
const NARROW_BAR_WIDTH: usize = 4;
// 缩进、大小列、方括号、百分比和状态符号，不含名称和进度条
const DOWNLOAD_CORE_WIDTH: usize = INDENT.len() + 1 + SIZE_WIDTH + 2 + 2 + PERCENT_WIDTH + 1 + 1;
const MIN_DETAIL_WIDTH: usize = 20;
const NARROW_NAME_WIDTH: usize = 4;

/// 某一时刻任务表的拷贝
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tasks: HashMap<String, TaskInfo>,
    pub order: Vec<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DownloadColumns {
    name_width: usize,
    bar_width: usize,
    show_speed: bool,
    show_eta: bool,
}

#[derive(Debug, Clone)]
pub struct RenderLayout {
    pub terminal_width: usize,
    pub bar_width: usize,
    pub min_name_width: usize,
    pub max_name_width: usize,
    pub spinner_fps: f64,
    /// 非交互模式下关闭动画，保证相同状态输出相同文本
    pub animate: bool,
}

impl RenderLayout {
    pub fn from_config(config: &ProgressConfig, terminal_width: usize, animate: bool) -> Self {
        Self {
            terminal_width: terminal_width.max(1),
            bar_width: config.bar_width.max(1),
            min_name_width: config.min_name_width,
            max_name_width: config.max_name_width.max(config.min_name_width),
            spinner_fps: config.spinner_fps,
            animate,
        }
    }

    /// 下载行的列布局
    ///
    /// 终端变窄时依次：把进度条压到最小宽度，再压到窄宽度，去掉 ETA 列，去掉速度列
    fn download_columns(&self) -> DownloadColumns {
        let stages = [
            (true, true, MIN_BAR_WIDTH),
            (true, true, NARROW_BAR_WIDTH),
            (true, false, NARROW_BAR_WIDTH),
            (false, false, NARROW_BAR_WIDTH),
        ];

        for (show_speed, show_eta, min_bar) in stages {
            let mut fixed = DOWNLOAD_CORE_WIDTH;
            if show_speed {
                fixed += 1 + SPEED_WIDTH;
            }
            if show_eta {
                fixed += 1 + ETA_WIDTH;
            }
            let available = self.terminal_width.saturating_sub(fixed);
            let min_bar = min_bar.min(self.bar_width);
            if available < self.min_name_width + min_bar {
                continue;
            }

            let bar_width = (available - self.min_name_width).min(self.bar_width);
            let name_width = (available - bar_width).clamp(self.min_name_width, self.max_name_width);
            return DownloadColumns {
                name_width,
                bar_width,
                show_speed,
                show_eta,
            };
        }

        // 实在放不下时由 compose 按终端宽度截断整行
        DownloadColumns {
            name_width: self.min_name_width,
            bar_width: NARROW_BAR_WIDTH.min(self.bar_width),
            show_speed: false,
            show_eta: false,
        }
    }

    fn detail_width(&self) -> usize {
        self.terminal_width
            .saturating_sub(DETAIL_INDENT.len() + "Error: ".len())
            .max(MIN_DETAIL_WIDTH)
    }

    fn spinner_frame(&self, clock_secs: f64) -> &'static str {
        if !self.animate {
            return SPINNER_FRAMES[0];
        }
        let ticks = (clock_secs * self.spinner_fps).floor();
        let idx = if ticks.is_finite() && ticks > 0.0 {
            (ticks as u64 % SPINNER_FRAMES.len() as u64) as usize
        } else {
            0
        };
        SPINNER_FRAMES[idx]
    }
}

/// 组合一帧完整输出：API 获取、下载、处理，最后是可选的汇总
///
/// 区块之间用空行分隔，没有任务的区块不输出
pub fn compose(snapshot: &Snapshot, layout: &RenderLayout, clock_secs: f64) -> Result<String, fmt::Error> {
    let mut api = Vec::new();
    let mut downloads = Vec::new();
    let mut processing = Vec::new();

    for task_id in &snapshot.order {
        let Some(task) = snapshot.tasks.get(task_id) else {
            continue;
        };
        match task.progress_type.section() {
            Section::ApiFetching => api.push(task),
            Section::Downloads => downloads.push(task),
            Section::Processing => processing.push(task),
        }
    }

    let mut sections = Vec::new();
    if !api.is_empty() {
        sections.push(render_api_section(&api, layout)?);
    }
    if !downloads.is_empty() {
        sections.push(render_download_section(&downloads, layout)?);
    }
    if !processing.is_empty() {
        sections.push(render_processing_section(&processing, layout, clock_secs)?);
    }
    if let Some(summary) = &snapshot.summary {
        sections.push(summary.trim_end().to_string());
    }

    // 任何一行都不能超过终端宽度，否则交互模式下换行会让光标回退的行数不对
    let frame = sections.join("\n\n");
    Ok(frame
        .lines()
        .map(|line| truncate_text(line, layout.terminal_width))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn render_api_section(tasks: &[&TaskInfo], layout: &RenderLayout) -> Result<String, fmt::Error> {
    let longest = tasks.iter().map(|t| display_width(&t.name)).max().unwrap_or(0);
    let longest_tail = tasks
        .iter()
        .map(|t| display_width(&api_tail(t)))
        .max()
        .unwrap_or(0);
    let name_width = longest
        .clamp(layout.min_name_width, layout.max_name_width)
        .min(layout.terminal_width.saturating_sub(INDENT.len() + longest_tail))
        .max(NARROW_NAME_WIDTH);

    let mut out = String::new();
    writeln!(out, "Fetching from API:")?;
    for task in tasks {
        let name = pad_to_width(&truncate_text(&task.name, name_width), name_width);
        writeln!(out, "{}{}{}", INDENT, name, api_tail(task))?;
    }
    Ok(out.trim_end_matches('\n').to_string())
}

fn api_tail(task: &TaskInfo) -> String {
    format!(" {}/{} {}", task.completed, task.total, api_status(task))
}

fn api_status(task: &TaskInfo) -> &'static str {
    if task.is_failed() {
        return "Failed";
    }
    let done = task.is_finished || (task.total > 0 && task.completed >= task.total);
    if !done {
        "Fetching..."
    } else if task.description.to_lowercase().contains("cache") {
        "Retrieved from cache"
    } else {
        "Retrieved"
    }
}

fn render_download_section(tasks: &[&TaskInfo], layout: &RenderLayout) -> Result<String, fmt::Error> {
    let columns = layout.download_columns();

    let mut out = String::new();
    if tasks.len() > 1 {
        let finished = tasks.iter().filter(|t| t.is_finished).count();
        writeln!(out, "Downloading ({}/{}):", finished, tasks.len())?;
    } else {
        writeln!(out, "Downloading:")?;
    }

    for task in tasks {
        let name = truncate_text(strip_package_extension(&task.name), columns.name_width);
        let size = format!("{}/{}", format_bytes(task.completed), format_bytes(task.total));
        let eta = if task.is_finished {
            if task.success == Some(true) {
                "00:00".to_string()
            } else {
                ETA_PLACEHOLDER.to_string()
            }
        } else {
            format_eta(task.eta_seconds())
        };

        let mut line = format!(
            "{}{} {:>sw$}",
            INDENT,
            pad_to_width(&name, columns.name_width),
            size,
            sw = SIZE_WIDTH,
        );
        if columns.show_speed {
            write!(line, " {:>vw$}", format_speed(task.current_speed), vw = SPEED_WIDTH)?;
        }
        if columns.show_eta {
            write!(line, " {:>ew$}", eta, ew = ETA_WIDTH)?;
        }
        writeln!(
            out,
            "{} [{}] {} {}",
            line,
            create_bar(task.completed, task.total, columns.bar_width),
            format_percentage(task.completed, task.total),
            status_glyph(task),
        )?;

        if task.is_failed() {
            let message = task.error_message.as_deref().unwrap_or("Download failed");
            writeln!(
                out,
                "{}Error: {}",
                DETAIL_INDENT,
                truncate_text(message, layout.detail_width())
            )?;
        }
    }
    Ok(out.trim_end_matches('\n').to_string())
}

fn render_processing_section(
    tasks: &[&TaskInfo],
    layout: &RenderLayout,
    clock_secs: f64,
) -> Result<String, fmt::Error> {
    // 同名任务属于同一个应用的不同阶段
    let mut groups: IndexMap<&str, Vec<&TaskInfo>> = IndexMap::new();
    for task in tasks {
        groups.entry(task.name.as_str()).or_default().push(task);
    }

    let mut out = String::new();
    for (_, mut phases) in groups {
        phases.sort_by_key(|t| t.phase);
        let Some(task) = active_phase(&phases) else {
            continue;
        };

        let prefix = format!(
            "{}({}/{}) {} ",
            INDENT,
            task.phase,
            task.total_phases,
            task.progress_type.verb()
        );
        let name_width = layout
            .terminal_width
            .saturating_sub(display_width(&prefix) + 2)
            .max(NARROW_NAME_WIDTH);
        let glyph = if task.is_finished {
            status_glyph(task)
        } else {
            layout.spinner_frame(clock_secs)
        };

        writeln!(out, "{}{} {}", prefix, truncate_text(&task.name, name_width), glyph)?;

        if task.is_failed() {
            let message = task.error_message.as_deref().unwrap_or("Failed");
            writeln!(
                out,
                "{}Error: {}",
                DETAIL_INDENT,
                truncate_text(message, layout.detail_width())
            )?;
        } else if let Some(warning) = task.warning_message.as_deref().filter(|_| task.has_warning()) {
            writeln!(
                out,
                "{}{} {}",
                DETAIL_INDENT,
                GLYPH_WARNING,
                truncate_text(warning, layout.detail_width())
            )?;
        }
    }
    Ok(out.trim_end_matches('\n').to_string())
}

/// 选出当前要显示的阶段：第一个未完成的，否则第一个失败的，否则最后一个
fn active_phase<'a>(phases: &[&'a TaskInfo]) -> Option<&'a TaskInfo> {
    phases
        .iter()
        .find(|t| !t.is_finished)
        .or_else(|| phases.iter().find(|t| t.is_failed()))
        .or_else(|| phases.last())
        .copied()
}

fn status_glyph(task: &TaskInfo) -> &'static str {
    if !task.is_finished {
        GLYPH_RUNNING
    } else if task.is_failed() {
        GLYPH_FAILURE
    } else if task.has_warning() {
        GLYPH_WARNING
    } else {
        GLYPH_SUCCESS
    }
}
