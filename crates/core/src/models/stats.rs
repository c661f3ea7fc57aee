use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 跟播任务执行统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionStats {
    pub total_follow_tasks: u64,
    pub status_counts: HashMap<String, u64>,
    pub retry_tasks: u64,
    pub success_rate: f64,
}

impl TaskExecutionStats {
    /// 部分成功按一半计入成功率，保留两位小数
    pub fn from_counts(status_counts: HashMap<String, u64>, retry_tasks: u64) -> Self {
        let total: u64 = status_counts.values().sum();
        let completed = status_counts.get("completed").copied().unwrap_or(0) as f64;
        let partial = status_counts.get("partial").copied().unwrap_or(0) as f64;
        let success_rate = if total > 0 {
            ((completed + partial * 0.5) / total as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            total_follow_tasks: total,
            status_counts,
            retry_tasks,
            success_rate,
        }
    }
}

/// 单个直播间弹幕任务的完成情况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanmuProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub remaining: u64,
}

impl DanmuProgress {
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.remaining == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// 待开播时间表中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTimeSlot {
    pub subject_id: i64,
    pub live_time: DateTime<Utc>,
    pub remark: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_counts_partial_as_half() {
        let mut counts = HashMap::new();
        counts.insert("completed".to_string(), 2);
        counts.insert("partial".to_string(), 1);
        counts.insert("failed".to_string(), 1);
        let stats = TaskExecutionStats::from_counts(counts, 1);
        assert_eq!(stats.total_follow_tasks, 4);
        assert_eq!(stats.success_rate, 62.5);
    }

    #[test]
    fn test_empty_stats() {
        let stats = TaskExecutionStats::from_counts(HashMap::new(), 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(!DanmuProgress::default().is_finished());
    }
}
