//! 进度显示用到的格式化函数，全部为纯函数

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub const SPEED_PLACEHOLDER: &str = "-- B/s";
pub const ETA_PLACEHOLDER: &str = "--:--";
const ELLIPSIS: &str = "...";

pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return SPEED_PLACEHOLDER.to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec.round() as u64))
}

pub fn format_eta(seconds: Option<f64>) -> String {
    match seconds {
        Some(secs) if secs.is_finite() && secs >= 0.0 => {
            let total = secs.ceil() as u64;
            let hours = total / 3600;
            let minutes = (total % 3600) / 60;
            let seconds = total % 60;
            if hours > 0 {
                format!("{}:{:02}:{:02}", hours, minutes, seconds)
            } else {
                format!("{:02}:{:02}", minutes, seconds)
            }
        }
        _ => ETA_PLACEHOLDER.to_string(),
    }
}

pub fn percentage(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (completed as u128 * 100) / total as u128;
    percent.min(100) as u8
}

pub fn format_percentage(completed: u64, total: u64) -> String {
    format!("{:>3}%", percentage(completed, total))
}

pub fn create_bar(completed: u64, total: u64, width: usize) -> String {
    let filled = if total == 0 {
        0
    } else {
        ((completed.min(total) as u128 * width as u128) / total as u128) as usize
    };
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

pub fn display_width(text: &str) -> usize {
    UnicodeWidthStr::width(text)
}

/// 按显示宽度截断，超出部分用 `...` 表示
pub fn truncate_text(text: &str, max_width: usize) -> String {
    if display_width(text) <= max_width {
        return text.to_string();
    }

    let ellipsis = if max_width > ELLIPSIS.len() { ELLIPSIS } else { "" };
    let budget = max_width - ellipsis.len();

    let mut result = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > budget {
            break;
        }
        width += ch_width;
        result.push(ch);
    }
    result.push_str(ellipsis);
    result
}

/// 左对齐并用空格补齐到指定显示宽度
pub fn pad_to_width(text: &str, width: usize) -> String {
    let current = display_width(text);
    if current >= width {
        text.to_string()
    } else {
        format!("{}{}", text, " ".repeat(width - current))
    }
}

/// `app.AppImage` -> `app`
pub fn strip_package_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx + 1..];
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                &name[..idx]
            } else {
                name
            }
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1000), "1000 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn speed_placeholder_for_unknown_rates() {
        assert_eq!(format_speed(0.0), SPEED_PLACEHOLDER);
        assert_eq!(format_speed(f64::NAN), SPEED_PLACEHOLDER);
        assert_eq!(format_speed(2048.0), "2.0 KB/s");
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(None), ETA_PLACEHOLDER);
        assert_eq!(format_eta(Some(65.2)), "01:06");
        assert_eq!(format_eta(Some(3725.0)), "1:02:05");
    }

    #[test]
    fn percentage_is_clamped() {
        assert_eq!(format_percentage(500, 1000), " 50%");
        assert_eq!(format_percentage(2000, 1000), "100%");
        assert_eq!(format_percentage(5, 0), "  0%");
    }

    #[test]
    fn bar_has_fixed_width() {
        let bar = create_bar(500, 1000, 10);
        assert_eq!(bar.chars().count(), 10);
        assert_eq!(bar, "█████░░░░░");
        assert_eq!(create_bar(0, 0, 4), "░░░░");
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a-very-long-application", 10), "a-very-...");
        assert_eq!(truncate_text("下载器应用程序", 7), "下载...");
        assert_eq!(truncate_text("abcdef", 2), "ab");
    }

    #[test]
    fn package_extension_is_stripped() {
        assert_eq!(strip_package_extension("app.AppImage"), "app");
        assert_eq!(strip_package_extension("my.app-1.2.AppImage"), "my.app-1.2");
        assert_eq!(strip_package_extension(".hidden"), ".hidden");
        assert_eq!(strip_package_extension("plain"), "plain");
    }
}
