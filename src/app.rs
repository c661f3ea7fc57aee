use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use livefollow_core::{
    progress::ProgressChannel,
    traits::{AutomationCapability, Notifier, TaskDispatch},
    AppConfig,
};
use livefollow_dispatcher::{
    MaintenanceService, RecoveryReport, TaskManager, TaskRetryService, TimerScheduler,
};
use livefollow_infrastructure::{
    DatabaseManager, SqliteRoomDirectory, SqliteTaskLogRepository, SqliteTaskRepository,
};
use livefollow_worker::{CommandAutomation, ExecutionDispatcher, HandlerContext, TracingNotifier};

/// 关闭时等待执行中任务的最长时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 主应用程序
///
/// 负责组装存储、调度器、执行器和维护循环。命令行的一次性操作只用到
/// `TaskManager`，此时调度器不运行，新任务只写入存储，由守护进程接管。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    task_repo: Arc<SqliteTaskRepository>,
    log_repo: Arc<SqliteTaskLogRepository>,
    rooms: Arc<SqliteRoomDirectory>,
    scheduler: Arc<TimerScheduler>,
    dispatcher: Arc<ExecutionDispatcher>,
    task_manager: Arc<TaskManager>,
    maintenance: Mutex<MaintenanceService>,
}

impl Application {
    /// 使用配置中的外部命令作为自动化能力
    pub async fn new(config: AppConfig) -> Result<Self> {
        let automation = Arc::new(CommandAutomation::new(config.automation.clone()));
        Self::with_collaborators(config, automation, Arc::new(TracingNotifier)).await
    }

    pub async fn with_collaborators(
        config: AppConfig,
        automation: Arc<dyn AutomationCapability>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        info!("初始化应用程序，数据库: {}", config.database.url);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("初始化数据库失败")?;
        let pool = database.pool().clone();

        let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let log_repo = Arc::new(SqliteTaskLogRepository::new(pool.clone()));
        let rooms = Arc::new(SqliteRoomDirectory::new(pool));
        let progress = Arc::new(ProgressChannel::new(config.progress.log_capacity));

        let scheduler = Arc::new(TimerScheduler::new(
            task_repo.clone(),
            config.scheduler.clone(),
        ));
        let retry = Arc::new(TaskRetryService::new(
            task_repo.clone(),
            scheduler.clone(),
            config.intervals.clone(),
            config.retry.clone(),
        ));

        let ctx = Arc::new(HandlerContext {
            task_repo: task_repo.clone(),
            log_repo: log_repo.clone(),
            rooms: rooms.clone(),
            automation,
            notifier,
            retry,
            progress: Arc::clone(&progress),
            automation_timeout: Duration::from_secs(config.scheduler.automation_timeout_seconds),
            notifications_enabled: config.features.enable_notifications,
        });
        let dispatcher = Arc::new(ExecutionDispatcher::with_default_handlers(
            ctx,
            config.scheduler.serialize_automation,
        ));

        let task_manager = Arc::new(TaskManager::new(
            task_repo.clone(),
            log_repo.clone(),
            rooms.clone(),
            scheduler.clone(),
            progress,
            config.intervals.clone(),
        ));
        let maintenance = MaintenanceService::new(
            Arc::clone(&scheduler),
            Arc::clone(&task_manager),
            config.scheduler.clone(),
            config.intervals.clone(),
        );

        Ok(Self {
            config,
            database,
            task_repo,
            log_repo,
            rooms,
            scheduler,
            dispatcher,
            task_manager,
            maintenance: Mutex::new(maintenance),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    pub fn task_manager(&self) -> Arc<TaskManager> {
        Arc::clone(&self.task_manager)
    }

    pub fn scheduler(&self) -> Arc<TimerScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn task_repository(&self) -> Arc<SqliteTaskRepository> {
        Arc::clone(&self.task_repo)
    }

    pub fn log_repository(&self) -> Arc<SqliteTaskLogRepository> {
        Arc::clone(&self.log_repo)
    }

    pub fn rooms(&self) -> Arc<SqliteRoomDirectory> {
        Arc::clone(&self.rooms)
    }

    /// 启动调度器和维护循环
    pub async fn start(&self) -> Result<RecoveryReport> {
        let dispatch: Arc<dyn TaskDispatch> = self.dispatcher.clone();
        let report = self
            .scheduler
            .start(dispatch)
            .await
            .context("启动调度器失败")?;
        self.maintenance.lock().await.start();
        Ok(report)
    }

    /// 停止维护循环和调度器，等待执行中的任务后关闭数据库
    pub async fn shutdown(&self, timeout: Duration) {
        self.maintenance.lock().await.stop().await;
        self.scheduler.shutdown(timeout).await;
        self.database.close().await;
        info!("应用程序已停止");
    }

    /// 守护进程模式，运行到收到关闭信号为止
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let report = self.start().await?;
        info!(
            "跟播调度已启动: 待触发任务 {} 个, 最大并发 {}",
            report.armed, self.config.scheduler.max_concurrent_executions
        );

        let _ = shutdown_rx.recv().await;
        info!("收到关闭信号");

        self.shutdown(SHUTDOWN_TIMEOUT).await;
        Ok(())
    }
}
