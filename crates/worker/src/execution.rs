use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use livefollow_core::{
    models::{ExecutionStatus, NewTaskLog, PayloadKind, Task},
    traits::{TaskDispatch, TaskHandler, TaskLogRepository, TaskRepository},
    SchedulerError, SchedulerResult,
};
use livefollow_dispatcher::IdempotencyGuard;

use crate::context::HandlerContext;
use crate::executors::{
    DanmuSendExecutor, FollowBatchExecutor, ImageRecognitionExecutor, LiveReminderExecutor,
};

/// 定时器触发后的执行入口
///
/// 幂等守卫放行后按负载类型查分发表调用执行器。执行器返回的错误和 panic
/// 都在这里收口：写一条失败日志，执行状态记为 `error`，不会传到执行池。
pub struct ExecutionDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    log_repo: Arc<dyn TaskLogRepository>,
    guard: IdempotencyGuard,
    handlers: HashMap<PayloadKind, Arc<dyn TaskHandler>>,
    session: Option<Mutex<()>>,
}

impl ExecutionDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        log_repo: Arc<dyn TaskLogRepository>,
        serialize_automation: bool,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(Arc::clone(&task_repo)),
            task_repo,
            log_repo,
            handlers: HashMap::new(),
            session: serialize_automation.then(|| Mutex::new(())),
        }
    }

    /// 注册四种内置执行器
    pub fn with_default_handlers(
        ctx: Arc<HandlerContext>,
        serialize_automation: bool,
    ) -> Self {
        let mut dispatcher = Self::new(
            Arc::clone(&ctx.task_repo),
            Arc::clone(&ctx.log_repo),
            serialize_automation,
        );
        dispatcher.register(Arc::new(LiveReminderExecutor::new(Arc::clone(&ctx))));
        dispatcher.register(Arc::new(FollowBatchExecutor::new(Arc::clone(&ctx))));
        dispatcher.register(Arc::new(ImageRecognitionExecutor::new(Arc::clone(&ctx))));
        dispatcher.register(Arc::new(DanmuSendExecutor::new(ctx)));
        dispatcher
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        info!("注册执行器: {}", handler.name());
        self.handlers.insert(handler.kind(), handler);
    }

    /// 执行一个任务，守卫拒绝时返回 None
    pub async fn execute(&self, task_id: &str) -> SchedulerResult<Option<ExecutionStatus>> {
        if !self.guard.try_consume(task_id).await?.is_granted() {
            metrics::counter!("livefollow_guard_rejections_total").increment(1);
            return Ok(None);
        }

        // 守卫已放行，读取失败也要留下执行日志
        let task = match self.task_repo.get_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                let e = SchedulerError::task_not_found(task_id);
                self.append_failure(NewTaskLog::failure(task_id, format!("读取任务失败：{e}")))
                    .await;
                return Err(e);
            }
            Err(e) => {
                self.append_failure(NewTaskLog::failure(task_id, format!("读取任务失败：{e}")))
                    .await;
                return Err(e);
            }
        };

        let status = match self.handlers.get(&task.payload.kind()) {
            Some(handler) => self.run_handler(handler.as_ref(), &task).await,
            None => {
                let message = format!("没有可用的执行器: {}", task.task_type);
                error!("{}", message);
                self.record_failure(&task, &message).await;
                ExecutionStatus::Error
            }
        };

        self.task_repo
            .update_execution_status(&task.task_id, status)
            .await?;
        metrics::counter!(
            "livefollow_tasks_executed_total",
            "task_type" => task.task_type.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
        Ok(Some(status))
    }

    async fn run_handler(&self, handler: &dyn TaskHandler, task: &Task) -> ExecutionStatus {
        let _session = match &self.session {
            Some(session) => Some(session.lock().await),
            None => None,
        };

        info!("开始执行{}", task.entity_description());
        let started = Instant::now();
        let result = AssertUnwindSafe(handler.handle(task)).catch_unwind().await;
        let elapsed = started.elapsed();
        metrics::histogram!("livefollow_task_duration_ms").record(elapsed.as_millis() as f64);

        match result {
            Ok(Ok(status)) => {
                info!(
                    "{} 执行结束: {}, 耗时 {}ms",
                    task.task_id,
                    status,
                    elapsed.as_millis()
                );
                status
            }
            Ok(Err(e)) => {
                if e.is_permanent() {
                    warn!("{} 无法执行: {}", task.task_id, e);
                } else {
                    error!("{} 执行出错: {}", task.task_id, e);
                }
                self.record_failure(task, &format!("执行出错：{e}")).await;
                ExecutionStatus::Error
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("{} 执行器 {} 发生panic: {}", task.task_id, handler.name(), message);
                self.record_failure(task, &format!("执行异常：{message}")).await;
                ExecutionStatus::Error
            }
        }
    }

    async fn record_failure(&self, task: &Task, message: &str) {
        let mut entry = NewTaskLog::failure(&task.task_id, message);
        if let Some(subject) = task.subjects().first() {
            entry = entry.with_subject(subject);
        }
        self.append_failure(entry).await;
    }

    async fn append_failure(&self, entry: NewTaskLog) {
        if let Err(e) = self.log_repo.append(&entry).await {
            warn!("写入失败日志出错 ({}): {}", entry.task_id, e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}

#[async_trait]
impl TaskDispatch for ExecutionDispatcher {
    async fn dispatch(&self, task_id: &str) {
        if let Err(e) = self.execute(task_id).await {
            error!("分发任务 {} 失败: {}", task_id, e);
        }
    }
}
