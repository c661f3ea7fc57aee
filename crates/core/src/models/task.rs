use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

/// 直播间引用（ID + 显示名称）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
}

impl Subject {
    pub fn new<S: Into<String>>(id: i64, name: S) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(ID: {})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LiveReminder,
    FollowTask,
    TestFollowTask,
    DanmuTask,
    ImageRecognitionTask,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::LiveReminder => "live_reminder",
            TaskType::FollowTask => "follow_task",
            TaskType::TestFollowTask => "test_follow_task",
            TaskType::DanmuTask => "danmu_task",
            TaskType::ImageRecognitionTask => "image_recognition_task",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> SchedulerResult<Self> {
        match s {
            "live_reminder" => Ok(TaskType::LiveReminder),
            "follow_task" => Ok(TaskType::FollowTask),
            "test_follow_task" => Ok(TaskType::TestFollowTask),
            "danmu_task" => Ok(TaskType::DanmuTask),
            "image_recognition_task" => Ok(TaskType::ImageRecognitionTask),
            _ => Err(SchedulerError::Serialization(format!("无效的任务类型: {s}"))),
        }
    }
}

/// 调度状态：只会从 Pending 翻转到 Consumed 一次
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending = 0,
    Consumed = 1,
}

impl TaskStatus {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(value: i64) -> SchedulerResult<Self> {
        match value {
            0 => Ok(TaskStatus::Pending),
            1 => Ok(TaskStatus::Consumed),
            _ => Err(SchedulerError::Serialization(format!(
                "无效的任务状态: {value}"
            ))),
        }
    }
}

/// 面向界面的执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Partial,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Partial
                | ExecutionStatus::Error
        )
    }

    /// 根据批次中成功的数量推导批次状态
    pub fn from_batch(succeeded: usize, total: usize) -> Self {
        if total > 0 && succeeded == total {
            ExecutionStatus::Completed
        } else if succeeded > 0 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> SchedulerResult<Self> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "executing" => Ok(ExecutionStatus::Executing),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "partial" => Ok(ExecutionStatus::Partial),
            "error" => Ok(ExecutionStatus::Error),
            _ => Err(SchedulerError::Serialization(format!("无效的执行状态: {s}"))),
        }
    }
}

/// 分发表的键，每个变体对应一个执行器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    LiveReminder,
    FollowBatch,
    DanmuSend,
    ImageRecognition,
}

/// 按任务类型区分的负载数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    LiveReminder {
        subject: Subject,
    },
    FollowBatch {
        subjects: Vec<Subject>,
        #[serde(default)]
        dry_run: bool,
    },
    DanmuSend {
        subject: Subject,
        speech: String,
        task_index: u32,
        total_tasks: u32,
        #[serde(default)]
        matched_image: Option<String>,
        #[serde(default)]
        dry_run: bool,
    },
    ImageRecognition {
        subject: Subject,
        #[serde(default)]
        attempt: u32,
        #[serde(default)]
        dry_run: bool,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            TaskPayload::LiveReminder { .. } => PayloadKind::LiveReminder,
            TaskPayload::FollowBatch { .. } => PayloadKind::FollowBatch,
            TaskPayload::DanmuSend { .. } => PayloadKind::DanmuSend,
            TaskPayload::ImageRecognition { .. } => PayloadKind::ImageRecognition,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::LiveReminder { .. } => TaskType::LiveReminder,
            TaskPayload::FollowBatch { dry_run: false, .. } => TaskType::FollowTask,
            TaskPayload::FollowBatch { dry_run: true, .. } => TaskType::TestFollowTask,
            TaskPayload::DanmuSend { .. } => TaskType::DanmuTask,
            TaskPayload::ImageRecognition { .. } => TaskType::ImageRecognitionTask,
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        match self {
            TaskPayload::FollowBatch { subjects, .. } => subjects,
            TaskPayload::LiveReminder { subject }
            | TaskPayload::DanmuSend { subject, .. }
            | TaskPayload::ImageRecognition { subject, .. } => std::slice::from_ref(subject),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        match self {
            TaskPayload::LiveReminder { .. } => false,
            TaskPayload::FollowBatch { dry_run, .. }
            | TaskPayload::DanmuSend { dry_run, .. }
            | TaskPayload::ImageRecognition { dry_run, .. } => *dry_run,
        }
    }

    pub fn references_subject(&self, subject_id: i64) -> bool {
        self.subjects().iter().any(|s| s.id == subject_id)
    }
}

/// 任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: TaskType,
    pub payload: TaskPayload,
    pub run_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub status: TaskStatus,
    pub execution_status: ExecutionStatus,
    pub retry_count: i32,
    pub remark: String,
}

impl Task {
    pub fn new<S: Into<String>>(task_id: S, payload: TaskPayload, run_time: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: payload.task_type(),
            payload,
            run_time,
            created_time: Utc::now(),
            status: TaskStatus::Pending,
            execution_status: ExecutionStatus::Pending,
            retry_count: 0,
            remark: String::new(),
        }
    }

    pub fn with_remark<S: Into<String>>(mut self, remark: S) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn subjects(&self) -> &[Subject] {
        self.payload.subjects()
    }

    /// 以 `,1,2,3,` 形式存储，便于按直播间做 LIKE 查询
    pub fn subject_ids_column(&self) -> String {
        let ids: Vec<String> = self.subjects().iter().map(|s| s.id.to_string()).collect();
        format!(",{},", ids.join(","))
    }

    pub fn entity_description(&self) -> String {
        format!("任务 '{}' ({})", self.task_id, self.task_type)
    }
}

/// 幂等守卫的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Granted,
    AlreadyConsumed,
    NotFound,
}

impl ConsumeOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, ConsumeOutcome::Granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_derivation() {
        assert_eq!(ExecutionStatus::from_batch(3, 3), ExecutionStatus::Completed);
        assert_eq!(ExecutionStatus::from_batch(2, 3), ExecutionStatus::Partial);
        assert_eq!(ExecutionStatus::from_batch(0, 3), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_batch(0, 0), ExecutionStatus::Failed);
    }

    #[test]
    fn test_payload_determines_task_type() {
        let subjects = vec![Subject::new(1, "RoomA")];
        let follow = TaskPayload::FollowBatch {
            subjects: subjects.clone(),
            dry_run: false,
        };
        let test_follow = TaskPayload::FollowBatch {
            subjects,
            dry_run: true,
        };
        assert_eq!(follow.task_type(), TaskType::FollowTask);
        assert_eq!(test_follow.task_type(), TaskType::TestFollowTask);
        assert_eq!(test_follow.kind(), PayloadKind::FollowBatch);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = TaskPayload::DanmuSend {
            subject: Subject::new(9, "RoomB"),
            speech: "欢迎来到直播间".to_string(),
            task_index: 2,
            total_tasks: 4,
            matched_image: Some("img1.png".to_string()),
            dry_run: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "danmu_send");
        assert_eq!(value["task_index"], 2);
        let decoded: TaskPayload = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_subject_ids_column() {
        let task = Task::new(
            "follow_task_1_2_1700000000",
            TaskPayload::FollowBatch {
                subjects: vec![Subject::new(1, "A"), Subject::new(2, "B")],
                dry_run: false,
            },
            Utc::now(),
        );
        assert_eq!(task.subject_ids_column(), ",1,2,");
        assert!(task.payload.references_subject(2));
        assert!(!task.payload.references_subject(3));
    }
}
