use std::time::Duration;

/// 进度显示配置
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// 后台渲染频率（次/秒）
    pub refresh_per_second: f64,
    pub bar_width: usize,
    pub min_name_width: usize,
    pub max_name_width: usize,
    /// 速度采样窗口大小
    pub speed_history_size: usize,
    /// 两次速度计算之间的最小间隔
    pub min_speed_interval: Duration,
    pub task_id_cache_size: usize,
    pub spinner_fps: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            refresh_per_second: 4.0,
            bar_width: 30,
            min_name_width: 15,
            max_name_width: 40,
            speed_history_size: 10,
            min_speed_interval: Duration::from_millis(500),
            task_id_cache_size: 1000,
            spinner_fps: 10.0,
        }
    }
}

impl ProgressConfig {
    pub fn refresh_interval(&self) -> Duration {
        if self.refresh_per_second.is_finite() && self.refresh_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.refresh_per_second)
        } else {
            Duration::from_millis(250)
        }
    }

    pub fn with_refresh_rate(mut self, refresh_per_second: f64) -> Self {
        self.refresh_per_second = refresh_per_second;
        self
    }
}
