use async_trait::async_trait;

use crate::{
    models::{ExecutionStatus, PayloadKind, Task},
    SchedulerResult,
};

/// 单一任务类型的执行器
///
/// 调用时幂等守卫已经放行，执行器负责写入执行日志并返回终态。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> PayloadKind;

    async fn handle(&self, task: &Task) -> SchedulerResult<ExecutionStatus>;
}

/// 定时器触发后的执行入口
#[async_trait]
pub trait TaskDispatch: Send + Sync {
    async fn dispatch(&self, task_id: &str);
}
