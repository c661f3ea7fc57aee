use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use livefollow_core::{
    config::{IntervalConfig, RetryPolicyConfig},
    models::{task_id, Subject, Task, TaskPayload, TaskType},
    traits::{SchedulerHandle, TaskRepository},
    SchedulerResult,
};

const FOLLOW_FAILURE_REASON: &str =
    "跟播失败：可能是微信状态、网络连接错误或直播间名称有误/未在直播";

/// 重试与链式派生
///
/// 失败重试和成功后的后续任务都在这里生成。所有派生任务都先写入存储，
/// 调度器运行时再挂上定时器。
#[async_trait]
pub trait RetryService: Send + Sync {
    /// 跟播全部失败后生成重试任务，达到上限或没有可重试的直播间时返回 None
    async fn schedule_follow_retry(
        &self,
        failed: &Task,
        retry_subjects: &[Subject],
        failed_rooms: &[Subject],
        reason: Option<&str>,
    ) -> SchedulerResult<Option<Task>>;

    /// 进入直播间成功后的第一次图像识别
    async fn chain_recognition(&self, subject: &Subject, dry_run: bool) -> SchedulerResult<Task>;

    /// 未识别到商品时的下一次识别，`retry_count` 沿用当前任务
    async fn schedule_next_recognition(
        &self,
        current: &Task,
        subject: &Subject,
        attempt: u32,
        dry_run: bool,
    ) -> SchedulerResult<Option<Task>>;

    /// 清理该直播间未发送的弹幕，再按话术顺序生成新的弹幕任务
    async fn schedule_danmu_batch(
        &self,
        subject: &Subject,
        speeches: &[String],
        matched_image: Option<String>,
        dry_run: bool,
    ) -> SchedulerResult<Vec<Task>>;

    async fn schedule_danmu_retry(&self, failed: &Task) -> SchedulerResult<Option<Task>>;
}

/// 重试服务实现
pub struct TaskRetryService {
    task_repo: Arc<dyn TaskRepository>,
    scheduler: Arc<dyn SchedulerHandle>,
    intervals: IntervalConfig,
    retry_config: RetryPolicyConfig,
}

impl TaskRetryService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        scheduler: Arc<dyn SchedulerHandle>,
        intervals: IntervalConfig,
        retry_config: RetryPolicyConfig,
    ) -> Self {
        Self {
            task_repo,
            scheduler,
            intervals,
            retry_config,
        }
    }

    /// 写入存储，调度器运行时挂上定时器
    async fn submit(&self, task: Task) -> SchedulerResult<Task> {
        self.task_repo.create(&task).await?;
        if self.scheduler.is_running() {
            if let Err(e) = self.scheduler.schedule(&task).await {
                warn!("任务 {} 已写入但挂载定时器失败: {}", task.task_id, e);
            }
        }
        Ok(task)
    }

    fn after_seconds(seconds: u64) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::seconds(seconds as i64)
    }
}

/// 失败直播间名称，最多列出三个
pub fn summarize_rooms(rooms: &[Subject]) -> String {
    let names: Vec<&str> = rooms.iter().take(3).map(|s| s.name.as_str()).collect();
    let mut summary = names.join("、");
    if rooms.len() > 3 {
        summary.push_str(&format!("等{}个", rooms.len()));
    }
    summary
}

#[async_trait]
impl RetryService for TaskRetryService {
    async fn schedule_follow_retry(
        &self,
        failed: &Task,
        retry_subjects: &[Subject],
        failed_rooms: &[Subject],
        reason: Option<&str>,
    ) -> SchedulerResult<Option<Task>> {
        if !self.retry_config.enable_auto_retry {
            debug!("自动重试已关闭: {}", failed.task_id);
            return Ok(None);
        }
        if failed.retry_count >= self.retry_config.max_follow_retry {
            info!(
                "任务 {} 已重试 {} 次，达到上限，不再重试",
                failed.task_id, failed.retry_count
            );
            return Ok(None);
        }
        if retry_subjects.is_empty() {
            debug!("任务 {} 没有可重试的直播间", failed.task_id);
            return Ok(None);
        }

        let retry_count = failed.retry_count + 1;
        let remark = format!(
            "跟播重试任务 - 第{}次重试\n原因：{}\n失败直播间：{}\n说明：尝试重新跟播失败的直播间",
            retry_count,
            reason.unwrap_or(FOLLOW_FAILURE_REASON),
            summarize_rooms(failed_rooms)
        );
        let task = Task::new(
            task_id::retry(&failed.task_id, retry_count),
            TaskPayload::FollowBatch {
                subjects: retry_subjects.to_vec(),
                dry_run: false,
            },
            Self::after_seconds(self.intervals.follow_task_retry),
        )
        .with_retry_count(retry_count)
        .with_remark(remark);

        let task = self.submit(task).await?;
        info!(
            "创建跟播重试任务 {} (第{}次), {} 秒后执行",
            task.task_id, retry_count, self.intervals.follow_task_retry
        );
        Ok(Some(task))
    }

    async fn chain_recognition(&self, subject: &Subject, dry_run: bool) -> SchedulerResult<Task> {
        let run_time = Self::after_seconds(self.intervals.image_recognition_retry);
        let task = Task::new(
            task_id::image_recognition(subject.id, run_time, 0),
            TaskPayload::ImageRecognition {
                subject: subject.clone(),
                attempt: 0,
                dry_run,
            },
            run_time,
        )
        .with_remark(format!("{} 图像识别", subject.name));

        let task = self.submit(task).await?;
        info!("直播间 {} 启动图像识别: {}", subject, task.task_id);
        Ok(task)
    }

    async fn schedule_next_recognition(
        &self,
        current: &Task,
        subject: &Subject,
        attempt: u32,
        dry_run: bool,
    ) -> SchedulerResult<Option<Task>> {
        let next_attempt = attempt + 1;
        if let Some(max) = self.retry_config.max_image_retry {
            if next_attempt >= max {
                info!("直播间 {} 图像识别已尝试 {} 次，停止识别", subject, next_attempt);
                return Ok(None);
            }
        }

        let run_time = Self::after_seconds(self.intervals.image_recognition_retry);
        let task = Task::new(
            task_id::image_recognition(subject.id, run_time, next_attempt),
            TaskPayload::ImageRecognition {
                subject: subject.clone(),
                attempt: next_attempt,
                dry_run,
            },
            run_time,
        )
        .with_retry_count(current.retry_count)
        .with_remark(format!("{} 图像识别 第{}次", subject.name, next_attempt + 1));

        let task = self.submit(task).await?;
        debug!("直播间 {} 下一次图像识别: {}", subject, task.task_id);
        Ok(Some(task))
    }

    async fn schedule_danmu_batch(
        &self,
        subject: &Subject,
        speeches: &[String],
        matched_image: Option<String>,
        dry_run: bool,
    ) -> SchedulerResult<Vec<Task>> {
        let purged = self
            .task_repo
            .delete_pending_by_subject(subject.id, TaskType::DanmuTask)
            .await?;
        if !purged.is_empty() {
            self.scheduler.unschedule(&purged).await;
            info!("直播间 {} 清理未发送弹幕任务 {} 个", subject, purged.len());
        }

        let batch_time = Utc::now();
        let first_delay = Duration::seconds(self.intervals.first_danmu_delay() as i64);
        let spacing = Duration::seconds(self.intervals.bullet_screen_send as i64);
        let total = speeches.len() as u32;

        let mut created = Vec::with_capacity(speeches.len());
        for (i, speech) in speeches.iter().enumerate() {
            let index = i as u32 + 1;
            let task = Task::new(
                task_id::danmu_task(subject.id, batch_time, index),
                TaskPayload::DanmuSend {
                    subject: subject.clone(),
                    speech: speech.clone(),
                    task_index: index,
                    total_tasks: total,
                    matched_image: matched_image.clone(),
                    dry_run,
                },
                batch_time + first_delay + spacing * i as i32,
            )
            .with_remark(format!("{} 第{}/{}条话术", subject.name, index, total));
            created.push(self.submit(task).await?);
        }

        info!(
            "直播间 {} 创建弹幕任务 {} 个, 间隔 {} 秒",
            subject,
            created.len(),
            self.intervals.bullet_screen_send
        );
        Ok(created)
    }

    async fn schedule_danmu_retry(&self, failed: &Task) -> SchedulerResult<Option<Task>> {
        if !self.retry_config.enable_auto_retry
            || failed.retry_count >= self.retry_config.max_bullet_retry
        {
            info!("弹幕任务 {} 不再重试 (已重试 {} 次)", failed.task_id, failed.retry_count);
            return Ok(None);
        }

        let retry_count = failed.retry_count + 1;
        let task = Task::new(
            task_id::retry(&failed.task_id, retry_count),
            failed.payload.clone(),
            Self::after_seconds(self.intervals.bullet_screen_retry),
        )
        .with_retry_count(retry_count)
        .with_remark(format!("弹幕重试 - 第{retry_count}次"));

        let task = self.submit(task).await?;
        info!("创建弹幕重试任务 {}", task.task_id);
        Ok(Some(task))
    }
}
