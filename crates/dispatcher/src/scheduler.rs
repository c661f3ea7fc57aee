use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use livefollow_core::{
    config::SchedulerConfig,
    models::Task,
    traits::{SchedulerHandle, TaskDispatch, TaskRepository},
    SchedulerError, SchedulerResult,
};

/// 启动恢复结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub armed: usize,
    pub stale_dropped: Vec<String>,
    pub expired_deleted: usize,
}

/// 定时器与存储对账结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 存储中已不再待触发的定时器
    pub orphan_timers: usize,
    /// 超过陈旧阈值且没有定时器的待触发任务
    pub stale_rows_deleted: u64,
    /// 由其他进程写入、补挂定时器的任务
    pub adopted: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_timers == 0 && self.stale_rows_deleted == 0 && self.adopted == 0
    }
}

struct TimerEntry {
    generation: u64,
    run_time: DateTime<Utc>,
    handle: JoinHandle<()>,
}

type TimerMap = Arc<Mutex<HashMap<String, TimerEntry>>>;

fn lock_timers(timers: &TimerMap) -> MutexGuard<'_, HashMap<String, TimerEntry>> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 单次定时器
///
/// 每个待触发任务对应一个 tokio 任务，睡眠到触发时间后从表中摘掉自己，
/// 再到执行池申请许可交给分发入口。存储是唯一的事实来源，
/// 定时器表随时可以从 `status=Pending` 的任务重新推导出来。
pub struct TimerScheduler {
    task_repo: Arc<dyn TaskRepository>,
    config: SchedulerConfig,
    timers: TimerMap,
    workers: Arc<Semaphore>,
    dispatch: OnceLock<Arc<dyn TaskDispatch>>,
    running: AtomicBool,
    next_generation: AtomicU64,
}

impl TimerScheduler {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: SchedulerConfig) -> Self {
        let permits = config.max_concurrent_executions.max(1);
        Self {
            task_repo,
            config,
            timers: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(permits)),
            dispatch: OnceLock::new(),
            running: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
        }
    }

    /// 启动调度器：恢复待触发任务、丢弃已过期的待触发任务、清理已消费任务
    #[instrument(skip(self, dispatch))]
    pub async fn start(&self, dispatch: Arc<dyn TaskDispatch>) -> SchedulerResult<RecoveryReport> {
        if self.dispatch.set(dispatch).is_err() {
            return Err(SchedulerError::Internal("调度器已经启动".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);

        let now = Utc::now();
        let mut report = RecoveryReport::default();

        let pending = self.task_repo.load_pending(now).await?;
        for task in &pending {
            match self.arm(task) {
                Ok(()) => report.armed += 1,
                Err(e) => warn!("恢复任务 {} 的定时器失败: {}", task.task_id, e),
            }
        }

        report.stale_dropped = self.task_repo.drop_stale_pending(now).await?;
        for task_id in &report.stale_dropped {
            let stale = SchedulerError::StaleTaskOnLoad {
                task_id: task_id.clone(),
            };
            warn!("{}", stale);
        }

        report.expired_deleted = self.delete_expired(now - self.retention()).await?;

        info!(
            "调度器启动完成: 恢复定时器 {} 个, 丢弃过期任务 {} 个, 清理已消费任务 {} 个",
            report.armed,
            report.stale_dropped.len(),
            report.expired_deleted
        );
        Ok(report)
    }

    /// 停止接收新任务，取消所有定时器，等待执行中的任务结束
    pub async fn shutdown(&self, timeout: StdDuration) {
        self.running.store(false, Ordering::SeqCst);

        let aborted = {
            let mut timers = lock_timers(&self.timers);
            let count = timers.len();
            for (_, entry) in timers.drain() {
                entry.handle.abort();
            }
            count
        };
        info!("调度器停止, 取消定时器 {} 个", aborted);

        let permits = self.config.max_concurrent_executions.max(1) as u32;
        match tokio::time::timeout(timeout, self.workers.acquire_many(permits)).await {
            Ok(Ok(_all)) => info!("执行中的任务已全部结束"),
            Ok(Err(_)) => {}
            Err(_) => warn!("等待执行中的任务超时 ({:?})", timeout),
        }
        self.workers.close();
    }

    /// 删除 `run_time < before` 的已消费任务并摘除对应定时器
    pub async fn delete_expired(&self, before: DateTime<Utc>) -> SchedulerResult<usize> {
        let deleted = self.task_repo.delete_expired(before).await?;
        if !deleted.is_empty() {
            self.unschedule(&deleted).await;
            debug!("清理已消费任务 {} 个", deleted.len());
        }
        Ok(deleted.len())
    }

    /// 删除 `run_time < before` 且已执行结束的任务，执行中的任务不受影响
    pub async fn delete_finished(&self, before: DateTime<Utc>) -> SchedulerResult<usize> {
        let deleted = self.task_repo.delete_finished(before).await?;
        if !deleted.is_empty() {
            self.unschedule(&deleted).await;
            debug!("清理已结束任务 {} 个", deleted.len());
        }
        Ok(deleted.len())
    }

    /// 定时器与存储对账
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> SchedulerResult<ReconcileReport> {
        if !self.is_running() {
            return Err(SchedulerError::SchedulerNotRunning);
        }

        let now = Utc::now();
        let stale_before = now - Duration::seconds(self.config.stale_task_threshold_seconds as i64);
        // 先取定时器快照再读存储，对账期间新挂的定时器不会被当成孤立定时器
        let armed: Vec<String> = lock_timers(&self.timers).keys().cloned().collect();
        let pending = self.task_repo.list_pending().await?;
        let pending_ids: HashSet<&str> = pending.iter().map(|t| t.task_id.as_str()).collect();

        let orphans: Vec<String> = armed
            .into_iter()
            .filter(|id| !pending_ids.contains(id.as_str()))
            .collect();
        let mut report = ReconcileReport {
            orphan_timers: self.unschedule(&orphans).await,
            ..ReconcileReport::default()
        };

        let mut stale = Vec::new();
        for task in &pending {
            if self.is_scheduled(&task.task_id).await {
                continue;
            }
            if task.run_time < stale_before {
                stale.push(task.task_id.clone());
            } else if task.run_time >= now {
                match self.arm(task) {
                    Ok(()) => report.adopted += 1,
                    Err(SchedulerError::TimerAlreadyArmed { .. }) => {}
                    Err(e) => warn!("补挂任务 {} 的定时器失败: {}", task.task_id, e),
                }
            }
        }
        report.stale_rows_deleted = self.task_repo.delete_pending(&stale).await?;

        if report.is_clean() {
            debug!("定时器与存储一致");
        } else {
            info!(
                "对账完成: 移除孤立定时器 {} 个, 删除陈旧任务 {} 个, 补挂定时器 {} 个",
                report.orphan_timers, report.stale_rows_deleted, report.adopted
            );
        }
        Ok(report)
    }

    pub fn armed_count(&self) -> usize {
        lock_timers(&self.timers).len()
    }

    /// 已挂定时器的任务及触发时间，按触发时间排序
    pub fn armed_timers(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut armed: Vec<(String, DateTime<Utc>)> = lock_timers(&self.timers)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.run_time))
            .collect();
        armed.sort_by_key(|(_, run_time)| *run_time);
        armed
    }

    fn retention(&self) -> Duration {
        Duration::seconds(self.config.expired_retention_seconds as i64)
    }

    fn arm(&self, task: &Task) -> SchedulerResult<()> {
        let dispatch = self
            .dispatch
            .get()
            .cloned()
            .ok_or(SchedulerError::SchedulerNotRunning)?;

        let mut timers = lock_timers(&self.timers);
        if timers.contains_key(&task.task_id) {
            return Err(SchedulerError::TimerAlreadyArmed {
                task_id: task.task_id.clone(),
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let timer = PendingTimer {
            task_id: task.task_id.clone(),
            run_time: task.run_time,
            generation,
            misfire_grace: Duration::seconds(self.config.misfire_grace_seconds as i64),
            timers: Arc::clone(&self.timers),
            workers: Arc::clone(&self.workers),
            dispatch,
        };
        let handle = tokio::spawn(timer.run());

        timers.insert(
            task.task_id.clone(),
            TimerEntry {
                generation,
                run_time: task.run_time,
                handle,
            },
        );
        debug!("挂载定时器: {} @ {}", task.task_id, task.run_time);
        Ok(())
    }
}

struct PendingTimer {
    task_id: String,
    run_time: DateTime<Utc>,
    generation: u64,
    misfire_grace: Duration,
    timers: TimerMap,
    workers: Arc<Semaphore>,
    dispatch: Arc<dyn TaskDispatch>,
}

impl PendingTimer {
    async fn run(self) {
        let delay = (self.run_time - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;

        {
            let mut timers = lock_timers(&self.timers);
            match timers.get(&self.task_id) {
                Some(entry) if entry.generation == self.generation => {
                    timers.remove(&self.task_id);
                }
                _ => return,
            }
        }

        let lateness = Utc::now() - self.run_time;
        if lateness > self.misfire_grace {
            warn!(
                "任务 {} 错过触发时间 {} 秒，跳过执行",
                self.task_id,
                lateness.num_seconds()
            );
            metrics::counter!("livefollow_tasks_misfired_total").increment(1);
            return;
        }

        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("执行池已关闭，丢弃触发: {}", self.task_id);
                return;
            }
        };

        metrics::counter!("livefollow_tasks_fired_total").increment(1);
        let dispatch = self.dispatch;
        let task_id = self.task_id;
        tokio::spawn(async move {
            let _permit = permit;
            dispatch.dispatch(&task_id).await;
        });
    }
}

#[async_trait]
impl SchedulerHandle for TimerScheduler {
    #[instrument(skip(self, task), fields(task_id = %task.task_id))]
    async fn schedule(&self, task: &Task) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::SchedulerNotRunning);
        }
        self.arm(task)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, task_id: &str) -> SchedulerResult<bool> {
        // 先改存储，定时器即使已经触发也会被幂等守卫拦下
        let marked = self.task_repo.mark_consumed(task_id).await?;
        let removed = self.unschedule(&[task_id.to_string()]).await > 0;
        if marked || removed {
            info!("已取消任务: {}", task_id);
        }
        Ok(marked || removed)
    }

    async fn unschedule(&self, task_ids: &[String]) -> usize {
        let mut timers = lock_timers(&self.timers);
        let mut removed = 0;
        for task_id in task_ids {
            if let Some(entry) = timers.remove(task_id) {
                entry.handle.abort();
                removed += 1;
            }
        }
        removed
    }

    async fn is_scheduled(&self, task_id: &str) -> bool {
        lock_timers(&self.timers).contains_key(task_id)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
