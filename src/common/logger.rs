use std::sync::OnceLock;

use colored::*;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

static CONSOLE_LEVEL: OnceLock<reload::Handle<LevelFilter, Registry>> = OnceLock::new();

/// 初始化日志，控制台输出到 stderr，级别可在运行时调整
pub fn init(level: LevelFilter) {
    let (filter, handle) = reload::Layer::new(level);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = CONSOLE_LEVEL.set(handle);
    }
}

/// 当前控制台日志级别；未初始化时返回 None
pub fn console_level() -> Option<LevelFilter> {
    CONSOLE_LEVEL.get().and_then(|handle| handle.clone_current())
}

/// 把控制台级别压到 `ceiling`，返回原来的级别以便恢复
///
/// 原级别已经不比 `ceiling` 更详细时不做修改，返回 None
pub fn suppress_console(ceiling: LevelFilter) -> Option<LevelFilter> {
    let handle = CONSOLE_LEVEL.get()?;
    let current = handle.clone_current()?;
    if current <= ceiling {
        return None;
    }
    handle.reload(ceiling).ok()?;
    Some(current)
}

pub fn restore_console(level: LevelFilter) {
    if let Some(handle) = CONSOLE_LEVEL.get() {
        let _ = handle.reload(level);
    }
}

/// 漂亮的日志输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示应用信息
    pub fn app_info(name: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {} ({})", "📦".magenta().bold(), name.as_ref().bold(), path.as_ref().cyan());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 显示完成总结
    pub fn completion_summary(succeeded: usize, failed: usize) {
        let headline = format!("安装完成：成功 {}，失败 {}", succeeded, failed);
        if failed == 0 {
            println!("\n{}", headline.green().bold());
        } else {
            println!("\n{}", headline.yellow().bold());
        }
    }
}
