use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 下载速度的滑动窗口估算
#[derive(Debug, Clone)]
pub struct SpeedTracker {
    samples: VecDeque<(Instant, u64)>,
    capacity: usize,
    min_interval: Duration,
    last_calculated: Option<Instant>,
    current_speed: f64,
}

impl SpeedTracker {
    pub fn new(capacity: usize, min_interval: Duration) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_interval,
            last_calculated: None,
            current_speed: 0.0,
        }
    }

    /// 记录一个采样点，返回当前平滑后的速度（字节/秒）
    pub fn record(&mut self, now: Instant, completed: u64) -> f64 {
        // 调用方覆盖了进度，旧窗口不再有效
        if let Some(&(_, last)) = self.samples.back() {
            if completed < last {
                self.samples.clear();
                self.current_speed = 0.0;
                self.last_calculated = None;
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((now, completed));

        let due = self
            .last_calculated
            .is_none_or(|at| now.saturating_duration_since(at) >= self.min_interval);

        if due && self.samples.len() >= 2 {
            if let (Some(&(first_at, first)), Some(&(last_at, last))) =
                (self.samples.front(), self.samples.back())
            {
                let elapsed = last_at.saturating_duration_since(first_at).as_secs_f64();
                if elapsed > 0.0 {
                    self.current_speed = last.saturating_sub(first) as f64 / elapsed;
                    self.last_calculated = Some(now);
                }
            }
        }

        self.current_speed
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
