use async_trait::async_trait;

use crate::{models::Task, SchedulerResult};

/// 调度器句柄
///
/// 执行器通过它把链式派生的任务交给调度器，调度器不关心任务的业务含义，
/// `task_id` 只是定时器的索引。
#[async_trait]
pub trait SchedulerHandle: Send + Sync {
    /// 为已写入存储的任务挂上定时器，同一ID已有定时器时返回错误
    async fn schedule(&self, task: &Task) -> SchedulerResult<()>;

    /// 先在存储中标记为已消费，再移除定时器
    async fn cancel(&self, task_id: &str) -> SchedulerResult<bool>;

    /// 只移除定时器，不修改存储
    async fn unschedule(&self, task_ids: &[String]) -> usize;

    async fn is_scheduled(&self, task_id: &str) -> bool;

    fn is_running(&self) -> bool;
}
