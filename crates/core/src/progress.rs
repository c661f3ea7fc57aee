//! 跟播进度通道
//!
//! 进程内的进度状态和有界日志，供界面轮询。所有读写都经过同一把互斥锁，
//! 日志超过容量时丢弃最早的记录。进度状态不做持久化。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Subject;

pub const DEFAULT_PROGRESS_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
    pub level: ProgressLevel,
    pub percent: Option<u8>,
    pub step: Option<String>,
    pub subject: Option<String>,
}

impl ProgressLogEntry {
    pub fn new<M: Into<String>>(level: ProgressLevel, message: M) -> Self {
        Self {
            time: Utc::now(),
            message: message.into(),
            level,
            percent: None,
            step: None,
            subject: None,
        }
    }

    pub fn info<M: Into<String>>(message: M) -> Self {
        Self::new(ProgressLevel::Info, message)
    }

    pub fn success<M: Into<String>>(message: M) -> Self {
        Self::new(ProgressLevel::Success, message)
    }

    pub fn warning<M: Into<String>>(message: M) -> Self {
        Self::new(ProgressLevel::Warning, message)
    }

    pub fn error<M: Into<String>>(message: M) -> Self {
        Self::new(ProgressLevel::Error, message)
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent.min(100));
        self
    }

    pub fn with_step<S: Into<String>>(mut self, step: S) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_subject(mut self, subject: &Subject) -> Self {
        self.subject = Some(subject.name.clone());
        self
    }
}

/// 当前进度快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatus {
    pub is_active: bool,
    pub current_subject: Option<String>,
    pub progress_percent: u8,
    pub step_label: String,
    pub subject_count: usize,
    pub completed_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub info: usize,
    pub success: usize,
    pub warning: usize,
    pub error: usize,
}

/// 一次轮询的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPoll {
    pub entries: Vec<ProgressLogEntry>,
    pub status: ProgressStatus,
    pub level_counts: LevelCounts,
    pub polled_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    status: ProgressStatus,
    log: VecDeque<ProgressLogEntry>,
}

#[derive(Debug)]
pub struct ProgressChannel {
    inner: Mutex<ProgressInner>,
    capacity: usize,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ProgressInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressInner> {
        // 进度只用于展示，锁中毒时沿用已有数据
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, entry: ProgressLogEntry) {
        let mut inner = self.lock();
        if let Some(percent) = entry.percent {
            inner.status.progress_percent = percent;
        }
        if let Some(step) = &entry.step {
            inner.status.step_label = step.clone();
        }
        while inner.log.len() >= self.capacity {
            inner.log.pop_front();
        }
        inner.log.push_back(entry);
    }

    /// 批次开始：清空旧日志并激活进度
    pub fn begin_batch(&self, subject_count: usize, step_label: &str) {
        let mut inner = self.lock();
        inner.log.clear();
        inner.status = ProgressStatus {
            is_active: true,
            current_subject: None,
            progress_percent: 0,
            step_label: step_label.to_string(),
            subject_count,
            completed_count: 0,
        };
    }

    pub fn set_current_subject(&self, subject: Option<&Subject>) {
        self.lock().status.current_subject = subject.map(|s| s.name.clone());
    }

    pub fn advance_completed(&self) {
        self.lock().status.completed_count += 1;
    }

    pub fn update_status<F>(&self, update: F)
    where
        F: FnOnce(&mut ProgressStatus),
    {
        let mut inner = self.lock();
        update(&mut inner.status);
        inner.status.progress_percent = inner.status.progress_percent.min(100);
    }

    /// 结束批次，保留日志供界面继续读取
    pub fn finish(&self, percent: u8, step_label: &str, completed_count: usize) {
        let mut inner = self.lock();
        inner.status.is_active = false;
        inner.status.progress_percent = percent.min(100);
        inner.status.step_label = step_label.to_string();
        inner.status.completed_count = completed_count;
    }

    /// 返回 `since` 之后的新日志和当前状态
    pub fn poll(&self, since: Option<DateTime<Utc>>) -> ProgressPoll {
        let inner = self.lock();
        let mut level_counts = LevelCounts::default();
        for entry in &inner.log {
            match entry.level {
                ProgressLevel::Info => level_counts.info += 1,
                ProgressLevel::Success => level_counts.success += 1,
                ProgressLevel::Warning => level_counts.warning += 1,
                ProgressLevel::Error => level_counts.error += 1,
            }
        }
        let entries = inner
            .log
            .iter()
            .filter(|entry| match since {
                Some(t) => entry.time > t,
                None => true,
            })
            .cloned()
            .collect();
        ProgressPoll {
            entries,
            status: inner.status.clone(),
            level_counts,
            polled_at: Utc::now(),
        }
    }

    pub fn status(&self) -> ProgressStatus {
        self.lock().status.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.log.clear();
        inner.status = ProgressStatus::default();
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let channel = ProgressChannel::new(3);
        for i in 0..5 {
            channel.append(ProgressLogEntry::info(format!("消息{i}")));
        }
        let poll = channel.poll(None);
        assert_eq!(poll.entries.len(), 3);
        assert_eq!(poll.entries[0].message, "消息2");
        assert_eq!(poll.entries[2].message, "消息4");
    }

    #[test]
    fn test_poll_since_returns_only_newer_entries() {
        let channel = ProgressChannel::default();
        channel.append(ProgressLogEntry::info("第一条"));
        let first = channel.poll(None);
        let cursor = first.entries.last().map(|e| e.time);
        std::thread::sleep(std::time::Duration::from_millis(2));
        channel.append(ProgressLogEntry::success("第二条").with_percent(40));

        let poll = channel.poll(cursor);
        assert_eq!(poll.entries.len(), 1);
        assert_eq!(poll.entries[0].message, "第二条");
        assert_eq!(poll.status.progress_percent, 40);
        assert_eq!(poll.level_counts.info, 1);
        assert_eq!(poll.level_counts.success, 1);
    }

    #[test]
    fn test_batch_lifecycle() {
        let channel = ProgressChannel::default();
        channel.append(ProgressLogEntry::warning("上一批次"));
        channel.begin_batch(2, "开始跟播");
        assert!(channel.is_empty());

        let subject = Subject::new(1, "RoomA");
        channel.set_current_subject(Some(&subject));
        channel.advance_completed();
        let status = channel.status();
        assert!(status.is_active);
        assert_eq!(status.subject_count, 2);
        assert_eq!(status.completed_count, 1);
        assert_eq!(status.current_subject.as_deref(), Some("RoomA"));

        channel.finish(100, "任务全部完成", 2);
        assert!(!channel.status().is_active);

        channel.reset();
        assert_eq!(channel.status(), ProgressStatus::default());
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_respect_capacity() {
        let channel = Arc::new(ProgressChannel::new(50));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let channel = Arc::clone(&channel);
            handles.push(tokio::spawn(async move {
                for i in 0..20 {
                    channel.append(ProgressLogEntry::info(format!("{worker}-{i}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(channel.len(), 50);
    }
}
