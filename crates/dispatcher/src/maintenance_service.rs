use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use livefollow_core::{
    config::{IntervalConfig, SchedulerConfig},
    SchedulerResult,
};

use crate::scheduler::TimerScheduler;
use crate::task_manager::TaskManager;

/// 维护循环
///
/// 定期对账定时器与存储、清理保留期外已执行结束的任务，并按开播时间表补建开播提醒。
/// 执行中的任务不会被清理。
pub struct MaintenanceService {
    scheduler: Arc<TimerScheduler>,
    task_manager: Arc<TaskManager>,
    config: SchedulerConfig,
    intervals: IntervalConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceService {
    pub fn new(
        scheduler: Arc<TimerScheduler>,
        task_manager: Arc<TaskManager>,
        config: SchedulerConfig,
        intervals: IntervalConfig,
    ) -> Self {
        Self {
            scheduler,
            task_manager,
            config,
            intervals,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("维护服务已经在运行");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let scheduler = Arc::clone(&self.scheduler);
        let task_manager = Arc::clone(&self.task_manager);
        let config = self.config.clone();
        let reconcile_every = StdDuration::from_secs(config.reconcile_interval_seconds.max(1));
        let sync_every = StdDuration::from_secs(self.intervals.live_room_check.max(1));

        let handle = tokio::spawn(async move {
            let mut reconcile_tick = interval(reconcile_every);
            let mut sync_tick = interval(sync_every);
            reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = reconcile_tick.tick() => {
                        if let Err(e) = Self::run_cleanup(&scheduler, &config).await {
                            error!("定时器对账失败: {}", e);
                        }
                    }
                    _ = sync_tick.tick(), if config.sync_live_times => {
                        match task_manager.sync_tasks_with_live_times().await {
                            Ok(created) if created > 0 => debug!("同步开播时间表, 新增提醒 {} 个", created),
                            Ok(_) => {}
                            Err(e) => error!("同步开播时间表失败: {}", e),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("收到维护服务停止请求");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
        info!(
            "维护服务已启动, 对账间隔 {:?}, 开播同步间隔 {:?}",
            reconcile_every, sync_every
        );
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("等待维护服务停止时出错: {}", e);
            }
        }
        info!("维护服务已停止");
    }

    /// 执行一次对账和已结束任务的清理
    pub async fn run_once(&self) -> SchedulerResult<()> {
        Self::run_cleanup(&self.scheduler, &self.config).await
    }

    async fn run_cleanup(scheduler: &TimerScheduler, config: &SchedulerConfig) -> SchedulerResult<()> {
        scheduler.reconcile().await?;
        let retention = Duration::seconds(config.expired_retention_seconds as i64);
        scheduler.delete_finished(Utc::now() - retention).await?;
        Ok(())
    }
}
