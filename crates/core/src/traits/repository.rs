//! 数据仓储层接口定义
//!
//! 此模块定义了任务存储的核心抽象接口：
//! - 任务仓储接口 (TaskRepository)：任务记录的唯一真实来源
//! - 执行日志仓储接口 (TaskLogRepository)：只追加的审计日志
//!
//! ## 设计原则
//!
//! ### 唯一插入路径
//! `create` 是任务进入存储的唯一方式，重复的 `task_id` 直接返回
//! [`SchedulerError::DuplicateTaskId`](crate::SchedulerError::DuplicateTaskId)，
//! 不会覆盖已有记录。
//!
//! ### 原子消费
//! `try_consume` 必须是一条原子的读-改-写语句，
//! 同一个 `task_id` 并发调用时只有一个调用方得到 `Granted`。
//!
//! ### 按直播间批量操作
//! 取消跟播流水线、清理旧弹幕任务都以直播间为维度，
//! 实现方应当用单条语句完成，返回受影响的任务ID供调度器移除定时器。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use livefollow_core::traits::TaskRepository;
//!
//! async fn restore(repo: &dyn TaskRepository) -> SchedulerResult<()> {
//!     let pending = repo.load_pending(Utc::now()).await?;
//!     for task in pending {
//!         println!("待恢复任务: {}", task.task_id);
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        ConsumeOutcome, DanmuProgress, ExecutionStatus, NewTaskLog, Task, TaskExecutionStats,
        TaskLogEntry, TaskType,
    },
    SchedulerResult,
};

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入新任务，`task_id` 已存在时返回 `DuplicateTaskId`
    async fn create(&self, task: &Task) -> SchedulerResult<()>;

    async fn get_by_id(&self, task_id: &str) -> SchedulerResult<Option<Task>>;

    /// 启动恢复用：`status=Pending` 且 `run_time >= now`
    async fn load_pending(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>>;

    /// 所有等待触发的任务，按触发时间排序
    async fn list_pending(&self) -> SchedulerResult<Vec<Task>>;

    /// 标记为已消费，已消费或不存在时返回 false
    async fn mark_consumed(&self, task_id: &str) -> SchedulerResult<bool>;

    /// 幂等守卫使用的原子消费
    async fn try_consume(&self, task_id: &str) -> SchedulerResult<ConsumeOutcome>;

    /// 删除 `run_time < before` 的已消费任务，返回被删除的任务ID
    async fn delete_expired(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>>;

    /// 删除 `run_time < before` 且已执行结束的任务，执行中的任务保留
    async fn delete_finished(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>>;

    /// 将 `run_time < before` 的待触发任务标记为已消费，返回受影响的任务ID
    async fn drop_stale_pending(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>>;

    /// 删除指定的待触发任务
    async fn delete_pending(&self, task_ids: &[String]) -> SchedulerResult<u64>;

    async fn update_execution_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
    ) -> SchedulerResult<bool>;

    /// 将引用该直播间的所有待触发任务标记为已消费
    async fn consume_pending_by_subject(&self, subject_id: i64) -> SchedulerResult<Vec<String>>;

    /// 删除该直播间指定类型的待触发任务
    async fn delete_pending_by_subject(
        &self,
        subject_id: i64,
        task_type: TaskType,
    ) -> SchedulerResult<Vec<String>>;

    /// 按ID前缀查询，`pending_only` 为 true 时只返回待触发任务
    async fn list_by_id_prefix(&self, prefix: &str, pending_only: bool)
        -> SchedulerResult<Vec<Task>>;

    /// 已消费且 `retry_count > 0` 的任务
    async fn list_retry_tasks(&self) -> SchedulerResult<Vec<Task>>;

    /// 跟播任务执行统计
    async fn execution_stats(&self) -> SchedulerResult<TaskExecutionStats>;

    /// 直播间弹幕任务完成情况
    async fn danmu_progress(&self, subject_id: i64) -> SchedulerResult<DanmuProgress>;
}

/// 执行日志仓储接口
#[async_trait]
pub trait TaskLogRepository: Send + Sync {
    async fn append(&self, entry: &NewTaskLog) -> SchedulerResult<TaskLogEntry>;

    /// 最近的日志，按执行时间倒序
    async fn list_recent(&self, limit: u32) -> SchedulerResult<Vec<TaskLogEntry>>;

    async fn list_by_task(&self, task_id: &str) -> SchedulerResult<Vec<TaskLogEntry>>;
}
