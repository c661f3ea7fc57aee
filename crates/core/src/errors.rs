use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务ID已存在: {task_id}")]
    DuplicateTaskId { task_id: String },

    #[error("任务未找到: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("直播间不存在: {subject_id}")]
    SubjectNotFound { subject_id: i64 },

    #[error("自动化能力不可用: {0}")]
    AutomationUnavailable(String),

    #[error("直播间当前未开播: {subject_name}")]
    NotCurrentlyLive { subject_name: String },

    #[error("任务已过期，启动时丢弃: {task_id}")]
    StaleTaskOnLoad { task_id: String },

    #[error("定时器已存在: {task_id}")]
    TimerAlreadyArmed { task_id: String },

    #[error("调度器未运行")]
    SchedulerNotRunning,

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
}

impl SchedulerError {
    pub fn duplicate_task_id<S: Into<String>>(task_id: S) -> Self {
        Self::DuplicateTaskId {
            task_id: task_id.into(),
        }
    }

    pub fn task_not_found<S: Into<String>>(task_id: S) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// 永久性错误不会触发任何重试
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SchedulerError::SubjectNotFound { .. }
                | SchedulerError::DuplicateTaskId { .. }
                | SchedulerError::InvalidTaskParams(_)
        )
    }

    /// 可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::AutomationUnavailable(_)
                | SchedulerError::NotCurrentlyLive { .. }
                | SchedulerError::ExecutionTimeout
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
