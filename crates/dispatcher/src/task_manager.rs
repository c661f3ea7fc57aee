use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use livefollow_core::{
    config::IntervalConfig,
    models::{
        task_id, DanmuProgress, Subject, Task, TaskExecutionStats, TaskLogEntry, TaskPayload,
    },
    progress::{ProgressChannel, ProgressLogEntry, ProgressPoll},
    traits::{RoomDirectory, SchedulerHandle, TaskLogRepository, TaskRepository},
    SchedulerError, SchedulerResult,
};

/// 跟播任务的触发时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAt {
    /// 短暂延迟后立即执行
    Immediate,
    At(DateTime<Utc>),
}

/// 面向界面和命令行的任务管理入口
///
/// 新任务一律先写入存储；调度器在本进程运行时立即挂上定时器，
/// 否则由守护进程在下一次对账时接管。
pub struct TaskManager {
    task_repo: Arc<dyn TaskRepository>,
    log_repo: Arc<dyn TaskLogRepository>,
    rooms: Arc<dyn RoomDirectory>,
    scheduler: Arc<dyn SchedulerHandle>,
    progress: Arc<ProgressChannel>,
    intervals: IntervalConfig,
}

impl TaskManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        log_repo: Arc<dyn TaskLogRepository>,
        rooms: Arc<dyn RoomDirectory>,
        scheduler: Arc<dyn SchedulerHandle>,
        progress: Arc<ProgressChannel>,
        intervals: IntervalConfig,
    ) -> Self {
        Self {
            task_repo,
            log_repo,
            rooms,
            scheduler,
            progress,
            intervals,
        }
    }

    /// 开播提醒，触发时间已过或直播间不存在时返回 false
    #[instrument(skip(self, remark))]
    pub async fn schedule_live_reminder(
        &self,
        subject_id: i64,
        run_time: DateTime<Utc>,
        remark: &str,
    ) -> SchedulerResult<bool> {
        if run_time <= Utc::now() {
            warn!("开播提醒时间已过: 直播间 {} @ {}", subject_id, run_time);
            return Ok(false);
        }
        let Some(subject) = self.rooms.find_subject(subject_id).await? else {
            warn!("{}", SchedulerError::SubjectNotFound { subject_id });
            return Ok(false);
        };

        let task = Task::new(
            task_id::live_reminder(subject.id, run_time),
            TaskPayload::LiveReminder {
                subject: subject.clone(),
            },
            run_time,
        )
        .with_remark(remark);

        let created = self.submit(task).await?;
        if created {
            info!("已安排开播提醒: {} @ {}", subject, run_time);
        }
        Ok(created)
    }

    /// 跟播任务，多个直播间在同一个任务中依次执行
    #[instrument(skip(self, subjects, remark), fields(subject_count = subjects.len()))]
    pub async fn schedule_follow(
        &self,
        subjects: Vec<Subject>,
        run_at: RunAt,
        remark: &str,
    ) -> SchedulerResult<bool> {
        if subjects.is_empty() {
            warn!("跟播任务没有直播间");
            return Ok(false);
        }

        let now = Utc::now();
        let run_time = match run_at {
            RunAt::Immediate => now + self.immediate_delay(),
            RunAt::At(time) if time <= now => {
                warn!("跟播时间已过: {}", time);
                return Ok(false);
            }
            RunAt::At(time) => time,
        };
        let ids: Vec<i64> = subjects.iter().map(|s| s.id).collect();
        let names: Vec<&str> = subjects.iter().map(|s| s.name.as_str()).collect();
        let description = names.join("、");

        let task = Task::new(
            task_id::follow_task(&ids, now),
            TaskPayload::FollowBatch {
                subjects,
                dry_run: false,
            },
            run_time,
        )
        .with_remark(remark);

        let created = self.submit(task).await?;
        if created {
            info!("已安排跟播任务: {} @ {}", description, run_time);
            self.progress.append(
                ProgressLogEntry::info(format!("已创建跟播任务: {description}"))
                    .with_step("等待执行"),
            );
        }
        Ok(created)
    }

    /// 测试跟播：流程完整执行，但不真正发送消息
    #[instrument(skip(self, subjects, remark), fields(subject_count = subjects.len()))]
    pub async fn schedule_test_follow(
        &self,
        subjects: Vec<Subject>,
        remark: &str,
    ) -> SchedulerResult<bool> {
        if subjects.is_empty() {
            warn!("测试跟播没有直播间");
            return Ok(false);
        }

        let now = Utc::now();
        let ids: Vec<i64> = subjects.iter().map(|s| s.id).collect();
        let task = Task::new(
            task_id::test_follow_task(&ids, now),
            TaskPayload::FollowBatch {
                subjects,
                dry_run: true,
            },
            now + self.immediate_delay(),
        )
        .with_remark(remark);

        let created = self.submit(task).await?;
        if created {
            self.progress
                .append(ProgressLogEntry::info("已创建测试跟播任务").with_step("等待执行"));
        }
        Ok(created)
    }

    pub async fn cancel_task(&self, task_id: &str) -> SchedulerResult<bool> {
        self.scheduler.cancel(task_id).await
    }

    /// 取消直播间的整条流水线（跟播、识别、弹幕），返回取消的任务数
    #[instrument(skip(self))]
    pub async fn cancel_pipeline_for_subject(&self, subject_id: i64) -> SchedulerResult<usize> {
        let consumed = self.task_repo.consume_pending_by_subject(subject_id).await?;
        if !consumed.is_empty() {
            self.scheduler.unschedule(&consumed).await;
            info!("直播间 {} 取消任务 {} 个", subject_id, consumed.len());
            self.progress.append(
                ProgressLogEntry::warning(format!("已停止直播间任务 {} 个", consumed.len()))
                    .with_step("已停止"),
            );
        }
        Ok(consumed.len())
    }

    pub async fn list_active_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.task_repo.list_pending().await
    }

    pub async fn list_task_logs(&self, limit: u32) -> SchedulerResult<Vec<TaskLogEntry>> {
        self.log_repo.list_recent(limit).await
    }

    pub fn poll_progress(&self, since: Option<DateTime<Utc>>) -> ProgressPoll {
        self.progress.poll(since)
    }

    pub fn reset_progress(&self) {
        self.progress.reset();
    }

    pub async fn get_retry_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.task_repo.list_retry_tasks().await
    }

    /// 取消某个任务派生的所有待执行重试任务
    pub async fn cancel_retry_tasks(&self, original_task_id: &str) -> SchedulerResult<usize> {
        let prefix = task_id::retry_prefix(original_task_id);
        let retries = self.task_repo.list_by_id_prefix(&prefix, true).await?;

        let mut cancelled = 0;
        for task in &retries {
            if self.scheduler.cancel(&task.task_id).await? {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("任务 {} 取消重试任务 {} 个", original_task_id, cancelled);
        }
        Ok(cancelled)
    }

    pub async fn execution_stats(&self) -> SchedulerResult<TaskExecutionStats> {
        self.task_repo.execution_stats().await
    }

    pub async fn danmu_progress(&self, subject_id: i64) -> SchedulerResult<DanmuProgress> {
        self.task_repo.danmu_progress(subject_id).await
    }

    /// 为开播时间表中还没有提醒的记录补建开播提醒
    pub async fn sync_tasks_with_live_times(&self) -> SchedulerResult<usize> {
        let slots = self.rooms.pending_live_times().await?;
        let mut created = 0;
        for slot in slots {
            let reminder_id = task_id::live_reminder(slot.subject_id, slot.live_time);
            if self.task_repo.get_by_id(&reminder_id).await?.is_some() {
                continue;
            }
            if self
                .schedule_live_reminder(slot.subject_id, slot.live_time, &slot.remark)
                .await?
            {
                created += 1;
            }
        }
        if created > 0 {
            info!("根据开播时间表补建开播提醒 {} 个", created);
        }
        Ok(created)
    }

    /// 按ID解析直播间，未知的ID被忽略
    pub async fn resolve_subjects(&self, subject_ids: &[i64]) -> SchedulerResult<Vec<Subject>> {
        self.rooms.get_room_subjects(subject_ids).await
    }

    fn immediate_delay(&self) -> Duration {
        Duration::seconds(self.intervals.immediate_follow_delay as i64)
    }

    /// 重复的任务ID返回 false
    async fn submit(&self, task: Task) -> SchedulerResult<bool> {
        match self.task_repo.create(&task).await {
            Ok(()) => {}
            Err(SchedulerError::DuplicateTaskId { task_id }) => {
                warn!("任务已存在，忽略重复创建: {}", task_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        if self.scheduler.is_running() {
            self.scheduler.schedule(&task).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefollow_core::models::{LiveTimeSlot, TaskType};
    use livefollow_testing_utils::{
        subjects, MockRoomDirectory, MockTaskLogRepository, MockTaskRepository,
        RecordingScheduler, TaskBuilder,
    };

    struct Fixture {
        repo: MockTaskRepository,
        rooms: MockRoomDirectory,
        scheduler: RecordingScheduler,
        manager: TaskManager,
    }

    fn fixture() -> Fixture {
        let repo = MockTaskRepository::new();
        let rooms = MockRoomDirectory::new()
            .with_room(Subject::new(1, "一号间"), &["欢迎"])
            .with_room(Subject::new(2, "二号间"), &[]);
        let scheduler = RecordingScheduler::new().with_repository(repo.clone());
        let manager = TaskManager::new(
            Arc::new(repo.clone()),
            Arc::new(MockTaskLogRepository::new()),
            Arc::new(rooms.clone()),
            Arc::new(scheduler.clone()),
            Arc::new(ProgressChannel::default()),
            IntervalConfig::default(),
        );
        Fixture {
            repo,
            rooms,
            scheduler,
            manager,
        }
    }

    #[tokio::test]
    async fn test_live_reminder_validation() {
        let f = fixture();
        let future = Utc::now() + Duration::hours(1);

        assert!(!f
            .manager
            .schedule_live_reminder(1, Utc::now() - Duration::minutes(1), "")
            .await
            .unwrap());
        assert!(!f.manager.schedule_live_reminder(99, future, "").await.unwrap());
        assert!(f.manager.schedule_live_reminder(1, future, "晚场").await.unwrap());
        // 同一直播间同一时间只有一个提醒
        assert!(!f.manager.schedule_live_reminder(1, future, "晚场").await.unwrap());

        let reminders = f.repo.tasks_of_type(TaskType::LiveReminder);
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].remark, "晚场");
        assert_eq!(f.scheduler.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn test_immediate_follow_is_pending_and_armed() {
        let f = fixture();
        let rooms = vec![Subject::new(1, "一号间"), Subject::new(2, "二号间")];

        assert!(f
            .manager
            .schedule_follow(rooms, RunAt::Immediate, "")
            .await
            .unwrap());

        let follows = f.repo.tasks_of_type(TaskType::FollowTask);
        assert_eq!(follows.len(), 1);
        assert!(follows[0].is_pending());
        assert!(follows[0].task_id.starts_with("follow_task_1_2_"));
        assert!(follows[0].run_time > Utc::now());
        assert!(follows[0].run_time <= Utc::now() + Duration::seconds(3));
        assert_eq!(f.scheduler.scheduled_ids(), vec![follows[0].task_id.clone()]);
        assert_eq!(f.manager.list_active_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_without_running_scheduler_is_only_persisted() {
        let f = fixture();
        f.scheduler.set_running(false);

        assert!(f
            .manager
            .schedule_test_follow(subjects(1, 1), "")
            .await
            .unwrap());
        assert_eq!(f.repo.tasks_of_type(TaskType::TestFollowTask).len(), 1);
        assert!(f.scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_pipeline_for_subject() {
        let f = fixture();
        let subject = Subject::new(1, "一号间");
        let recognition = TaskBuilder::image_recognition(subject.clone(), 0).build();
        let danmu = TaskBuilder::danmu(subject, "欢迎", 1, 1).build();
        let other = TaskBuilder::danmu(Subject::new(2, "二号间"), "你好", 1, 1).build();
        for task in [&recognition, &danmu, &other] {
            f.repo.create(task).await.unwrap();
            f.scheduler.schedule(task).await.unwrap();
        }

        assert_eq!(f.manager.cancel_pipeline_for_subject(1).await.unwrap(), 2);
        assert!(!f.repo.get(&recognition.task_id).unwrap().is_pending());
        assert!(!f.repo.get(&danmu.task_id).unwrap().is_pending());
        assert!(f.repo.get(&other.task_id).unwrap().is_pending());
        assert_eq!(f.scheduler.scheduled_ids(), vec![other.task_id]);
        assert_eq!(f.manager.poll_progress(None).entries.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_retry_tasks() {
        let f = fixture();
        let rooms = subjects(1, 1);
        let original = "follow_task_1_100";
        for n in 1..=2 {
            let retry = TaskBuilder::follow_batch(rooms.clone(), false)
                .with_id(&task_id::retry(original, n))
                .with_retry_count(n)
                .build();
            f.repo.create(&retry).await.unwrap();
        }

        assert_eq!(f.manager.cancel_retry_tasks(original).await.unwrap(), 2);
        assert_eq!(f.manager.get_retry_tasks().await.unwrap().len(), 2);
        assert_eq!(f.manager.cancel_retry_tasks(original).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_live_times_creates_missing_reminders() {
        let f = fixture();
        let live_time = Utc::now() + Duration::hours(2);
        f.rooms.add_live_time(LiveTimeSlot {
            subject_id: 1,
            live_time,
            remark: "周末场".to_string(),
        });
        f.rooms.add_live_time(LiveTimeSlot {
            subject_id: 42,
            live_time,
            remark: String::new(),
        });

        assert_eq!(f.manager.sync_tasks_with_live_times().await.unwrap(), 1);
        assert_eq!(f.manager.sync_tasks_with_live_times().await.unwrap(), 0);
        assert!(f
            .repo
            .get(&task_id::live_reminder(1, live_time))
            .is_some());
    }

    #[tokio::test]
    async fn test_reset_progress() {
        let f = fixture();
        f.manager
            .schedule_follow(subjects(1, 1), RunAt::Immediate, "")
            .await
            .unwrap();
        assert!(!f.manager.poll_progress(None).entries.is_empty());

        f.manager.reset_progress();
        let poll = f.manager.poll_progress(None);
        assert!(poll.entries.is_empty());
        assert!(!poll.status.is_active);
    }
}
