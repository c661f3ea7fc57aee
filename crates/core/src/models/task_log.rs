use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

use super::Subject;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success = 1,
    Failure = 2,
}

impl TaskOutcome {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(value: i64) -> SchedulerResult<Self> {
        match value {
            1 => Ok(TaskOutcome::Success),
            2 => Ok(TaskOutcome::Failure),
            _ => Err(SchedulerError::Serialization(format!(
                "无效的执行结果: {value}"
            ))),
        }
    }
}

/// 只追加的任务执行日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub id: i64,
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub message: String,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub execution_time: DateTime<Utc>,
}

/// 待写入的日志记录，写入后由存储层分配自增ID
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskLog {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub message: String,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub execution_time: DateTime<Utc>,
}

impl NewTaskLog {
    fn new<S: Into<String>, M: Into<String>>(task_id: S, outcome: TaskOutcome, message: M) -> Self {
        Self {
            task_id: task_id.into(),
            outcome,
            message: message.into(),
            subject_id: None,
            subject_name: None,
            execution_time: Utc::now(),
        }
    }

    pub fn success<S: Into<String>, M: Into<String>>(task_id: S, message: M) -> Self {
        Self::new(task_id, TaskOutcome::Success, message)
    }

    pub fn failure<S: Into<String>, M: Into<String>>(task_id: S, message: M) -> Self {
        Self::new(task_id, TaskOutcome::Failure, message)
    }

    pub fn with_subject(mut self, subject: &Subject) -> Self {
        self.subject_id = Some(subject.id);
        self.subject_name = Some(subject.name.clone());
        self
    }

    pub fn into_entry(self, id: i64) -> TaskLogEntry {
        TaskLogEntry {
            id,
            task_id: self.task_id,
            outcome: self.outcome,
            message: self.message,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            execution_time: self.execution_time,
        }
    }
}
