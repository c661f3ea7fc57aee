//! # 跟播任务引擎核心
//!
//! 数据模型、错误类型、仓储与协作方接口、配置以及进度通道。
//! 其他 crate 通过这里定义的 trait 协作，彼此之间不直接依赖实现。

pub mod config;
pub mod errors;
pub mod models;
pub mod progress;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    ConsumeOutcome, DanmuProgress, ExecutionStatus, LiveTimeSlot, NewTaskLog, PayloadKind,
    Subject, Task, TaskExecutionStats, TaskLogEntry, TaskOutcome, TaskPayload, TaskStatus,
    TaskType,
};
pub use progress::{
    ProgressChannel, ProgressLevel, ProgressLogEntry, ProgressPoll, ProgressStatus,
};
pub use traits::{
    AutomationCapability, MatchOutcome, Notifier, PrepareOutcome, RoomDirectory,
    SchedulerHandle, SendMode, SendOutcome, TaskDispatch, TaskHandler, TaskLogRepository,
    TaskRepository,
};
