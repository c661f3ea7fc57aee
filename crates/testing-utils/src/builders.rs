//! 测试数据构建器

use chrono::{DateTime, Duration, Utc};
use livefollow_core::models::{
    task_id, ExecutionStatus, Subject, Task, TaskPayload, TaskStatus,
};

/// 任务构建器，默认是一分钟后触发的开播提醒
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::live_reminder(Subject::new(1, "测试直播间"))
    }

    pub fn live_reminder(subject: Subject) -> Self {
        let run_time = Utc::now() + Duration::seconds(60);
        Self {
            task: Task::new(
                task_id::live_reminder(subject.id, run_time),
                TaskPayload::LiveReminder { subject },
                run_time,
            ),
        }
    }

    pub fn follow_batch(subjects: Vec<Subject>, dry_run: bool) -> Self {
        let now = Utc::now();
        let ids: Vec<i64> = subjects.iter().map(|s| s.id).collect();
        let task_id = if dry_run {
            task_id::test_follow_task(&ids, now)
        } else {
            task_id::follow_task(&ids, now)
        };
        Self {
            task: Task::new(task_id, TaskPayload::FollowBatch { subjects, dry_run }, now),
        }
    }

    pub fn image_recognition(subject: Subject, attempt: u32) -> Self {
        let now = Utc::now();
        Self {
            task: Task::new(
                task_id::image_recognition(subject.id, now, attempt),
                TaskPayload::ImageRecognition {
                    subject,
                    attempt,
                    dry_run: false,
                },
                now,
            ),
        }
    }

    /// `index` 从1开始
    pub fn danmu(subject: Subject, speech: &str, index: u32, total: u32) -> Self {
        let now = Utc::now();
        Self {
            task: Task::new(
                task_id::danmu_task(subject.id, now, index),
                TaskPayload::DanmuSend {
                    subject,
                    speech: speech.to_string(),
                    task_index: index,
                    total_tasks: total,
                    matched_image: None,
                    dry_run: false,
                },
                now,
            ),
        }
    }

    pub fn with_id(mut self, task_id: &str) -> Self {
        self.task.task_id = task_id.to_string();
        self
    }

    pub fn with_run_time(mut self, run_time: DateTime<Utc>) -> Self {
        self.task.run_time = run_time;
        self
    }

    /// 相对当前时间的触发偏移，负数表示已经过期
    pub fn run_in(self, offset: Duration) -> Self {
        self.with_run_time(Utc::now() + offset)
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.task.retry_count = retry_count;
        self
    }

    pub fn with_remark(mut self, remark: &str) -> Self {
        self.task.remark = remark.to_string();
        self
    }

    pub fn dry_run(mut self) -> Self {
        match &mut self.task.payload {
            TaskPayload::FollowBatch { dry_run, .. }
            | TaskPayload::DanmuSend { dry_run, .. }
            | TaskPayload::ImageRecognition { dry_run, .. } => *dry_run = true,
            TaskPayload::LiveReminder { .. } => {}
        }
        self.task.task_type = self.task.payload.task_type();
        self
    }

    pub fn consumed(mut self) -> Self {
        self.task.status = TaskStatus::Consumed;
        self
    }

    pub fn with_execution_status(mut self, status: ExecutionStatus) -> Self {
        self.task.execution_status = status;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 批量生成测试直播间，ID 从 `first_id` 递增
pub fn subjects(first_id: i64, count: usize) -> Vec<Subject> {
    (0..count as i64)
        .map(|offset| {
            let id = first_id + offset;
            Subject::new(id, format!("直播间{id}"))
        })
        .collect()
}
