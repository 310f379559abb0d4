use std::collections::HashMap;

use indexmap::IndexMap;

use super::models::ProgressType;

const MAX_SLUG_LEN: usize = 20;

/// 生成会话内不重复的任务ID
///
/// 相同的 (类型, 名称) 复用之前生成的ID，缓存按最近使用淘汰
#[derive(Debug)]
pub struct TaskIdGenerator {
    counters: HashMap<ProgressType, u64>,
    cache: IndexMap<(ProgressType, String), String>,
    capacity: usize,
}

impl TaskIdGenerator {
    pub fn new(capacity: usize) -> Self {
        Self {
            counters: HashMap::new(),
            cache: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn generate(&mut self, progress_type: ProgressType, name: &str) -> String {
        let key = (progress_type, name.to_string());

        // 命中后移动到末尾，保持 LRU 顺序
        if let Some((key, task_id)) = self.cache.shift_remove_entry(&key) {
            self.cache.insert(key, task_id.clone());
            return task_id;
        }

        let counter = self.counters.entry(progress_type).or_insert(0);
        *counter += 1;
        let task_id = format!("{}_{}_{}", progress_type.id_prefix(), counter, slugify(name));

        self.cache.insert(key, task_id.clone());
        while self.cache.len() > self.capacity {
            self.cache.shift_remove_index(0);
        }

        task_id
    }

    /// 清空缓存；计数器保留，保证ID不会被再次分配
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(MAX_SLUG_LEN)
        .collect();
    if slug.is_empty() { "task".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_and_name_reuse_id() {
        let mut ids = TaskIdGenerator::new(100);
        let first = ids.generate(ProgressType::Download, "X");
        let second = ids.generate(ProgressType::Download, "X");
        assert_eq!(first, second);
        assert_eq!(first, "dl_1_X");
    }

    #[test]
    fn different_type_or_name_get_new_ids() {
        let mut ids = TaskIdGenerator::new(100);
        let a = ids.generate(ProgressType::Download, "X");
        let b = ids.generate(ProgressType::Download, "Y");
        let c = ids.generate(ProgressType::Installation, "X");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(b, "dl_2_Y");
        assert_eq!(c, "install_1_X");
    }

    #[test]
    fn evicted_entries_get_fresh_ids() {
        let mut ids = TaskIdGenerator::new(2);
        let a = ids.generate(ProgressType::Download, "a");
        ids.generate(ProgressType::Download, "b");
        ids.generate(ProgressType::Download, "c");
        assert_eq!(ids.cached_len(), 2);

        let again = ids.generate(ProgressType::Download, "a");
        assert_ne!(a, again);
    }

    #[test]
    fn hit_refreshes_recency() {
        let mut ids = TaskIdGenerator::new(2);
        let a = ids.generate(ProgressType::Download, "a");
        ids.generate(ProgressType::Download, "b");
        ids.generate(ProgressType::Download, "a");
        ids.generate(ProgressType::Download, "c");
        assert_eq!(ids.generate(ProgressType::Download, "a"), a);
    }

    #[test]
    fn slug_is_sanitized() {
        let mut ids = TaskIdGenerator::new(10);
        let id = ids.generate(ProgressType::Verification, "My App/β v1.0 (x86_64)");
        assert_eq!(id, "verify_1_MyAppv1.0x86_64");

        let id = ids.generate(ProgressType::Verification, "应用");
        assert_eq!(id, "verify_2_task");
    }

    #[test]
    fn clear_keeps_counters() {
        let mut ids = TaskIdGenerator::new(10);
        let first = ids.generate(ProgressType::Update, "app");
        ids.clear();
        let second = ids.generate(ProgressType::Update, "app");
        assert_ne!(first, second);
        assert_eq!(second, "update_2_app");
    }
}
