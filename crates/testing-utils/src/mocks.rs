//! 仓储与协作方接口的内存实现
//!
//! 语义与 SQLite 实现保持一致，单元测试不需要真实数据库和界面自动化。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livefollow_core::models::{
    task_id, ConsumeOutcome, DanmuProgress, ExecutionStatus, LiveTimeSlot, NewTaskLog, Subject,
    Task, TaskExecutionStats, TaskLogEntry, TaskStatus, TaskType,
};
use livefollow_core::traits::{
    AutomationCapability, MatchOutcome, Notifier, PrepareOutcome, RoomDirectory,
    SchedulerHandle, SendMode, SendOutcome, TaskLogRepository, TaskRepository,
};
use livefollow_core::{SchedulerError, SchedulerResult};

/// TaskRepository 的内存实现，按插入顺序保存任务
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<Vec<Task>>>,
    /// 取完快照后再返回，模拟慢查询
    list_delay: Option<Duration>,
    /// `get_by_id` 读不到的任务
    unreadable: Arc<Mutex<HashSet<String>>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(tasks)),
            ..Self::default()
        }
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// 之后 `get_by_id` 对该任务返回 None，行本身仍然保留
    pub fn make_unreadable(&self, task_id: &str) {
        self.unreadable.lock().unwrap().insert(task_id.to_string());
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned()
    }

    pub fn tasks_of_type(&self, task_type: TaskType) -> Vec<Task> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.tasks.lock().unwrap().clear();
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.iter().any(|t| t.task_id == task.task_id) {
            return Err(SchedulerError::duplicate_task_id(&task.task_id));
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn get_by_id(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        if self.unreadable.lock().unwrap().contains(task_id) {
            return Ok(None);
        }
        Ok(self.get(task_id))
    }

    async fn load_pending(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let mut pending: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_pending() && t.run_time >= now)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.run_time);
        Ok(pending)
    }

    async fn list_pending(&self) -> SchedulerResult<Vec<Task>> {
        let mut pending: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.run_time);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(pending)
    }

    async fn mark_consumed(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.task_id == task_id && t.is_pending()) {
            Some(task) => {
                task.status = TaskStatus::Consumed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn try_consume(&self, task_id: &str) -> SchedulerResult<ConsumeOutcome> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.task_id == task_id) {
            Some(task) if task.is_pending() => {
                task.status = TaskStatus::Consumed;
                task.execution_status = ExecutionStatus::Executing;
                Ok(ConsumeOutcome::Granted)
            }
            Some(_) => Ok(ConsumeOutcome::AlreadyConsumed),
            None => Ok(ConsumeOutcome::NotFound),
        }
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut deleted = Vec::new();
        tasks.retain(|t| {
            let expired = !t.is_pending() && t.run_time < before;
            if expired {
                deleted.push(t.task_id.clone());
            }
            !expired
        });
        Ok(deleted)
    }

    async fn delete_finished(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut deleted = Vec::new();
        tasks.retain(|t| {
            let finished = !t.is_pending()
                && t.execution_status.is_terminal()
                && t.run_time < before;
            if finished {
                deleted.push(t.task_id.clone());
            }
            !finished
        });
        Ok(deleted)
    }

    async fn drop_stale_pending(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut dropped = Vec::new();
        for task in tasks.iter_mut().filter(|t| t.is_pending() && t.run_time < before) {
            task.status = TaskStatus::Consumed;
            dropped.push(task.task_id.clone());
        }
        Ok(dropped)
    }

    async fn delete_pending(&self, task_ids: &[String]) -> SchedulerResult<u64> {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| !(t.is_pending() && task_ids.contains(&t.task_id)));
        Ok((before - tasks.len()) as u64)
    }

    async fn update_execution_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
    ) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.task_id == task_id) {
            Some(task) => {
                task.execution_status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_pending_by_subject(&self, subject_id: i64) -> SchedulerResult<Vec<String>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut consumed = Vec::new();
        for task in tasks
            .iter_mut()
            .filter(|t| t.is_pending() && t.payload.references_subject(subject_id))
        {
            task.status = TaskStatus::Consumed;
            consumed.push(task.task_id.clone());
        }
        Ok(consumed)
    }

    async fn delete_pending_by_subject(
        &self,
        subject_id: i64,
        task_type: TaskType,
    ) -> SchedulerResult<Vec<String>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut deleted = Vec::new();
        tasks.retain(|t| {
            let matched = t.is_pending()
                && t.task_type == task_type
                && t.payload.references_subject(subject_id);
            if matched {
                deleted.push(t.task_id.clone());
            }
            !matched
        });
        Ok(deleted)
    }

    async fn list_by_id_prefix(
        &self,
        prefix: &str,
        pending_only: bool,
    ) -> SchedulerResult<Vec<Task>> {
        let mut matched: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.task_id.starts_with(prefix) && (!pending_only || t.is_pending()))
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.run_time);
        Ok(matched)
    }

    async fn list_retry_tasks(&self) -> SchedulerResult<Vec<Task>> {
        let mut retries: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_pending() && t.retry_count > 0)
            .cloned()
            .collect();
        retries.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        Ok(retries)
    }

    async fn execution_stats(&self) -> SchedulerResult<TaskExecutionStats> {
        let tasks = self.tasks.lock().unwrap();
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut retry_tasks = 0;
        for task in tasks.iter().filter(|t| t.task_type == TaskType::FollowTask) {
            *counts
                .entry(task.execution_status.as_str().to_string())
                .or_default() += 1;
            if task.retry_count > 0 {
                retry_tasks += 1;
            }
        }
        Ok(TaskExecutionStats::from_counts(counts, retry_tasks))
    }

    async fn danmu_progress(&self, subject_id: i64) -> SchedulerResult<DanmuProgress> {
        let tasks = self.tasks.lock().unwrap();
        let mut progress = DanmuProgress::default();
        for task in tasks
            .iter()
            .filter(|t| t.task_type == TaskType::DanmuTask && t.payload.references_subject(subject_id))
        {
            progress.total += 1;
            match task.execution_status {
                ExecutionStatus::Completed => progress.completed += 1,
                ExecutionStatus::Failed | ExecutionStatus::Error => progress.failed += 1,
                _ => {}
            }
            if task.is_pending() {
                progress.remaining += 1;
            }
        }
        Ok(progress)
    }
}

/// TaskLogRepository 的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockTaskLogRepository {
    entries: Arc<Mutex<Vec<TaskLogEntry>>>,
}

impl MockTaskLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TaskLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_for(&self, task_id: &str) -> Vec<TaskLogEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskLogRepository for MockTaskLogRepository {
    async fn append(&self, entry: &NewTaskLog) -> SchedulerResult<TaskLogEntry> {
        let mut entries = self.entries.lock().unwrap();
        let stored = entry.clone().into_entry(entries.len() as i64 + 1);
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn list_recent(&self, limit: u32) -> SchedulerResult<Vec<TaskLogEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn list_by_task(&self, task_id: &str) -> SchedulerResult<Vec<TaskLogEntry>> {
        Ok(self.entries_for(task_id))
    }
}

/// 自动化调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationCall {
    Prepare { subject_id: i64, mode: SendMode },
    Match { subject_id: i64 },
    Send { subject_id: i64, text: String, mode: SendMode },
}

impl AutomationCall {
    pub fn subject_id(&self) -> i64 {
        match self {
            AutomationCall::Prepare { subject_id, .. }
            | AutomationCall::Match { subject_id }
            | AutomationCall::Send { subject_id, .. } => *subject_id,
        }
    }
}

#[derive(Debug, Default)]
struct AutomationScript {
    prepare: HashMap<i64, VecDeque<PrepareOutcome>>,
    matching: HashMap<i64, VecDeque<MatchOutcome>>,
    send: HashMap<i64, VecDeque<SendOutcome>>,
    calls: Vec<(AutomationCall, DateTime<Utc>)>,
}

/// 按直播间预设结果的自动化能力
///
/// 未预设的调用返回 Ready / NoMatch / Sent。
#[derive(Debug, Clone, Default)]
pub struct MockAutomation {
    script: Arc<Mutex<AutomationScript>>,
    delay: Option<Duration>,
}

impl MockAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用前等待一段时间，用于验证串行执行
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script_prepare(&self, subject_id: i64, outcome: PrepareOutcome) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.prepare.entry(subject_id).or_default().push_back(outcome);
        self
    }

    pub fn script_match(&self, subject_id: i64, outcome: MatchOutcome) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.matching.entry(subject_id).or_default().push_back(outcome);
        self
    }

    pub fn script_send(&self, subject_id: i64, outcome: SendOutcome) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.send.entry(subject_id).or_default().push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<AutomationCall> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    /// 调用记录及开始时间
    pub fn timed_calls(&self) -> Vec<(AutomationCall, DateTime<Utc>)> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn sent_messages(&self, subject_id: i64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AutomationCall::Send {
                    subject_id: id,
                    text,
                    ..
                } if id == subject_id => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: AutomationCall) {
        self.script.lock().unwrap().calls.push((call, Utc::now()));
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AutomationCapability for MockAutomation {
    async fn enter_and_prepare_subject(&self, subject: &Subject, mode: SendMode) -> PrepareOutcome {
        self.record(AutomationCall::Prepare {
            subject_id: subject.id,
            mode,
        });
        self.pause().await;
        let mut script = self.script.lock().unwrap();
        script
            .prepare
            .get_mut(&subject.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(PrepareOutcome::Ready)
    }

    async fn match_bound_image(&self, subject: &Subject) -> MatchOutcome {
        self.record(AutomationCall::Match {
            subject_id: subject.id,
        });
        self.pause().await;
        let mut script = self.script.lock().unwrap();
        script
            .matching
            .get_mut(&subject.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MatchOutcome::NoMatch)
    }

    async fn send_message(&self, subject: &Subject, text: &str, mode: SendMode) -> SendOutcome {
        self.record(AutomationCall::Send {
            subject_id: subject.id,
            text: text.to_string(),
            mode,
        });
        self.pause().await;
        let mut script = self.script.lock().unwrap();
        script
            .send
            .get_mut(&subject.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendOutcome::Sent)
    }
}

/// RoomDirectory 的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockRoomDirectory {
    rooms: Arc<Mutex<Vec<Subject>>>,
    speeches: Arc<Mutex<HashMap<i64, Vec<String>>>>,
    live_times: Arc<Mutex<Vec<LiveTimeSlot>>>,
    started: Arc<Mutex<Vec<i64>>>,
}

impl MockRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room(self, subject: Subject, speeches: &[&str]) -> Self {
        self.speeches.lock().unwrap().insert(
            subject.id,
            speeches.iter().map(|s| s.to_string()).collect(),
        );
        self.rooms.lock().unwrap().push(subject);
        self
    }

    pub fn add_live_time(&self, slot: LiveTimeSlot) {
        self.live_times.lock().unwrap().push(slot);
    }

    /// 触发过开播标记的直播间
    pub fn started_subjects(&self) -> Vec<i64> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoomDirectory for MockRoomDirectory {
    async fn find_subject(&self, subject_id: i64) -> SchedulerResult<Option<Subject>> {
        Ok(self
            .rooms
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subject_id)
            .cloned())
    }

    async fn get_room_speeches(&self, subject: &Subject) -> SchedulerResult<Vec<String>> {
        Ok(self
            .speeches
            .lock()
            .unwrap()
            .get(&subject.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_room_subjects(&self, subject_ids: &[i64]) -> SchedulerResult<Vec<Subject>> {
        let rooms = self.rooms.lock().unwrap();
        let mut seen = HashSet::new();
        Ok(subject_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| rooms.iter().find(|s| s.id == *id).cloned())
            .collect())
    }

    async fn mark_live_started(&self, subject_id: i64) -> SchedulerResult<bool> {
        self.started.lock().unwrap().push(subject_id);
        let mut live_times = self.live_times.lock().unwrap();
        match live_times.iter().position(|slot| slot.subject_id == subject_id) {
            Some(index) => {
                live_times.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_live_times(&self) -> SchedulerResult<Vec<LiveTimeSlot>> {
        let now = Utc::now();
        Ok(self
            .live_times
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.live_time > now)
            .cloned()
            .collect())
    }
}

/// 记录所有通知的 Notifier
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .map(|(title, _)| title)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_user(&self, title: &str, message: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

/// 只记录调用、不真正挂定时器的调度器句柄
#[derive(Debug, Clone)]
pub struct RecordingScheduler {
    scheduled: Arc<Mutex<Vec<Task>>>,
    unscheduled: Arc<Mutex<Vec<String>>>,
    repository: Option<MockTaskRepository>,
    running: Arc<AtomicBool>,
}

impl Default for RecordingScheduler {
    fn default() -> Self {
        Self {
            scheduled: Arc::default(),
            unscheduled: Arc::default(),
            repository: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cancel` 时同步在仓储中标记为已消费
    pub fn with_repository(mut self, repository: MockTaskRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<Task> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.task_id.clone())
            .collect()
    }

    pub fn unscheduled(&self) -> Vec<String> {
        self.unscheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchedulerHandle for RecordingScheduler {
    async fn schedule(&self, task: &Task) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::SchedulerNotRunning);
        }
        let mut scheduled = self.scheduled.lock().unwrap();
        if scheduled.iter().any(|t| t.task_id == task.task_id) {
            return Err(SchedulerError::TimerAlreadyArmed {
                task_id: task.task_id.clone(),
            });
        }
        scheduled.push(task.clone());
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> SchedulerResult<bool> {
        let marked = match &self.repository {
            Some(repository) => repository.mark_consumed(task_id).await?,
            None => false,
        };
        let removed = self.unschedule(&[task_id.to_string()]).await > 0;
        Ok(marked || removed)
    }

    async fn unschedule(&self, task_ids: &[String]) -> usize {
        let mut scheduled = self.scheduled.lock().unwrap();
        let before = scheduled.len();
        scheduled.retain(|t| !task_ids.contains(&t.task_id));
        self.unscheduled
            .lock()
            .unwrap()
            .extend(task_ids.iter().cloned());
        before - scheduled.len()
    }

    async fn is_scheduled(&self, task_id: &str) -> bool {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.task_id == task_id)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// 便于断言重试链的辅助函数
pub fn retry_ids_of(repository: &MockTaskRepository, original_task_id: &str) -> Vec<String> {
    let prefix = task_id::retry_prefix(original_task_id);
    repository
        .get_all_tasks()
        .into_iter()
        .filter(|t| t.task_id.starts_with(&prefix))
        .map(|t| t.task_id)
        .collect()
}
