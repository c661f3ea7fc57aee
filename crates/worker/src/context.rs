use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use livefollow_core::{
    models::{NewTaskLog, Subject, Task},
    progress::ProgressChannel,
    traits::{
        AutomationCapability, MatchOutcome, Notifier, PrepareOutcome, RoomDirectory, SendMode,
        SendOutcome, TaskLogRepository, TaskRepository,
    },
    SchedulerError, SchedulerResult,
};
use livefollow_dispatcher::RetryService;

/// 执行器共享的依赖
///
/// 所有自动化调用都带超时，超时按自动化失败处理。
#[derive(Clone)]
pub struct HandlerContext {
    pub task_repo: Arc<dyn TaskRepository>,
    pub log_repo: Arc<dyn TaskLogRepository>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub automation: Arc<dyn AutomationCapability>,
    pub notifier: Arc<dyn Notifier>,
    pub retry: Arc<dyn RetryService>,
    pub progress: Arc<ProgressChannel>,
    pub automation_timeout: Duration,
    pub notifications_enabled: bool,
}

impl HandlerContext {
    pub async fn log_success(&self, task: &Task, subject: Option<&Subject>, message: &str) {
        let mut entry = NewTaskLog::success(&task.task_id, message);
        if let Some(subject) = subject {
            entry = entry.with_subject(subject);
        }
        self.append_log(entry).await;
    }

    pub async fn log_failure(&self, task: &Task, subject: Option<&Subject>, message: &str) {
        let mut entry = NewTaskLog::failure(&task.task_id, message);
        if let Some(subject) = subject {
            entry = entry.with_subject(subject);
        }
        self.append_log(entry).await;
    }

    async fn append_log(&self, entry: NewTaskLog) {
        if let Err(e) = self.log_repo.append(&entry).await {
            error!("写入执行日志失败 ({}): {}", entry.task_id, e);
        }
    }

    pub async fn notify(&self, title: &str, message: &str) {
        if self.notifications_enabled {
            self.notifier.notify_user(title, message).await;
        }
    }

    /// 进入直播间，未就绪时返回对应的错误
    pub async fn enter(&self, subject: &Subject, mode: SendMode) -> SchedulerResult<()> {
        match self.prepare(subject, mode).await {
            PrepareOutcome::Ready => Ok(()),
            PrepareOutcome::NotLive => Err(SchedulerError::NotCurrentlyLive {
                subject_name: subject.name.clone(),
            }),
            PrepareOutcome::AutomationError(e) => Err(SchedulerError::AutomationUnavailable(e)),
        }
    }

    async fn prepare(&self, subject: &Subject, mode: SendMode) -> PrepareOutcome {
        match tokio::time::timeout(
            self.automation_timeout,
            self.automation.enter_and_prepare_subject(subject, mode),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("进入直播间超时: {}", subject);
                PrepareOutcome::AutomationError(SchedulerError::ExecutionTimeout.to_string())
            }
        }
    }

    pub async fn match_image(&self, subject: &Subject) -> SchedulerResult<MatchOutcome> {
        tokio::time::timeout(self.automation_timeout, self.automation.match_bound_image(subject))
            .await
            .map_err(|_| SchedulerError::ExecutionTimeout)
    }

    pub async fn send(&self, subject: &Subject, text: &str, mode: SendMode) -> SendOutcome {
        match tokio::time::timeout(
            self.automation_timeout,
            self.automation.send_message(subject, text, mode),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::Failed(SchedulerError::ExecutionTimeout.to_string()),
        }
    }
}
