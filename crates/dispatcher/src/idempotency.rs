use std::sync::Arc;

use livefollow_core::{models::ConsumeOutcome, traits::TaskRepository, SchedulerResult};
use tracing::{debug, warn};

/// 幂等守卫
///
/// 所有执行路径在产生任何副作用之前都要先通过守卫。守卫把任务从
/// Pending 原子地翻转为 Consumed，同一个任务ID无论被触发多少次、
/// 无论是否跨进程重启，都只有一次能拿到 `Granted`。
#[derive(Clone)]
pub struct IdempotencyGuard {
    task_repo: Arc<dyn TaskRepository>,
}

impl IdempotencyGuard {
    pub fn new(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { task_repo }
    }

    pub async fn try_consume(&self, task_id: &str) -> SchedulerResult<ConsumeOutcome> {
        let outcome = self.task_repo.try_consume(task_id).await?;
        match outcome {
            ConsumeOutcome::Granted => debug!("幂等守卫放行任务: {}", task_id),
            ConsumeOutcome::AlreadyConsumed => {
                debug!("任务 {} 已被消费，跳过执行", task_id)
            }
            ConsumeOutcome::NotFound => warn!("任务 {} 不存在，跳过执行", task_id),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefollow_testing_utils::{MockTaskRepository, TaskBuilder};

    #[tokio::test]
    async fn test_second_consume_is_rejected() {
        let task = TaskBuilder::new().build();
        let repo = MockTaskRepository::with_tasks(vec![task.clone()]);
        let guard = IdempotencyGuard::new(Arc::new(repo));

        assert_eq!(
            guard.try_consume(&task.task_id).await.unwrap(),
            ConsumeOutcome::Granted
        );
        assert_eq!(
            guard.try_consume(&task.task_id).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
        assert_eq!(
            guard.try_consume("unknown").await.unwrap(),
            ConsumeOutcome::NotFound
        );
    }
}
