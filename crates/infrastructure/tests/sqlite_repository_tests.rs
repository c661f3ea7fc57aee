use std::sync::Arc;

use chrono::{Duration, Utc};
use livefollow_core::{
    config::DatabaseConfig,
    models::{
        task_id, ConsumeOutcome, ExecutionStatus, LiveTimeSlot, NewTaskLog, Subject, Task,
        TaskOutcome, TaskPayload, TaskStatus, TaskType,
    },
    traits::{RoomDirectory, TaskLogRepository, TaskRepository},
    SchedulerError,
};
use livefollow_infrastructure::{
    DatabaseManager, SqliteRoomDirectory, SqliteTaskLogRepository, SqliteTaskRepository,
};
use tempfile::TempDir;

async fn setup_database() -> (TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("livefollow.db").display()),
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    (dir, manager)
}

fn reminder(subject: Subject, offset_secs: i64) -> Task {
    let run_time = Utc::now() + Duration::seconds(offset_secs);
    Task::new(
        task_id::live_reminder(subject.id, run_time),
        TaskPayload::LiveReminder { subject },
        run_time,
    )
}

fn danmu(subject: &Subject, index: u32, offset_secs: i64) -> Task {
    let batch_time = Utc::now();
    Task::new(
        task_id::danmu_task(subject.id, batch_time, index),
        TaskPayload::DanmuSend {
            subject: subject.clone(),
            speech: format!("话术{index}"),
            task_index: index,
            total_tasks: 3,
            matched_image: None,
            dry_run: false,
        },
        batch_time + Duration::seconds(offset_secs),
    )
}

#[tokio::test]
async fn test_create_and_reload_task() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let task = reminder(Subject::new(74, "测试直播间"), 60).with_remark("首播");
    repo.create(&task).await.unwrap();

    let loaded = repo.get_by_id(&task.task_id).await.unwrap().unwrap();
    assert_eq!(loaded.task_type, TaskType::LiveReminder);
    assert_eq!(loaded.payload, task.payload);
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.execution_status, ExecutionStatus::Pending);
    assert_eq!(loaded.remark, "首播");
    assert_eq!(
        loaded.run_time.timestamp_millis(),
        task.run_time.timestamp_millis()
    );
}

#[tokio::test]
async fn test_duplicate_task_id_is_rejected() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let task = reminder(Subject::new(1, "A"), 60);
    repo.create(&task).await.unwrap();

    let mut second = task.clone();
    second.remark = "覆盖".to_string();
    let err = repo.create(&second).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateTaskId { .. }));

    let stored = repo.get_by_id(&task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.remark, "");
}

#[tokio::test]
async fn test_concurrent_try_consume_grants_once() {
    let (_dir, db) = setup_database().await;
    let repo = Arc::new(SqliteTaskRepository::new(db.pool().clone()));

    let task = reminder(Subject::new(2, "B"), 30);
    repo.create(&task).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = Arc::clone(&repo);
        let task_id = task.task_id.clone();
        handles.push(tokio::spawn(async move { repo.try_consume(&task_id).await }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ConsumeOutcome::Granted => granted += 1,
            ConsumeOutcome::AlreadyConsumed => {}
            ConsumeOutcome::NotFound => panic!("任务不应该消失"),
        }
    }
    assert_eq!(granted, 1);

    let stored = repo.get_by_id(&task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Consumed);
    assert_eq!(stored.execution_status, ExecutionStatus::Executing);

    assert_eq!(
        repo.try_consume("missing").await.unwrap(),
        ConsumeOutcome::NotFound
    );
}

#[tokio::test]
async fn test_load_pending_drop_stale_and_delete_expired() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let future = reminder(Subject::new(3, "C"), 120);
    let stale = reminder(Subject::new(4, "D"), -120);
    repo.create(&future).await.unwrap();
    repo.create(&stale).await.unwrap();

    let now = Utc::now();
    let pending = repo.load_pending(now).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, future.task_id);

    let dropped = repo.drop_stale_pending(now).await.unwrap();
    assert_eq!(dropped, vec![stale.task_id.clone()]);
    assert!(!repo.get_by_id(&stale.task_id).await.unwrap().unwrap().is_pending());

    let deleted = repo.delete_expired(now).await.unwrap();
    assert_eq!(deleted, vec![stale.task_id.clone()]);
    assert!(repo.get_by_id(&stale.task_id).await.unwrap().is_none());
    assert!(repo.get_by_id(&future.task_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_finished_keeps_running_tasks() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let running = reminder(Subject::new(5, "E"), -120);
    let completed = reminder(Subject::new(6, "F"), -120);
    let failed = reminder(Subject::new(7, "G"), -120);
    let cancelled = reminder(Subject::new(8, "H"), -120);
    for task in [&running, &completed, &failed, &cancelled] {
        repo.create(task).await.unwrap();
    }
    for task in [&running, &completed, &failed] {
        assert!(repo.try_consume(&task.task_id).await.unwrap().is_granted());
    }
    repo.update_execution_status(&completed.task_id, ExecutionStatus::Completed)
        .await
        .unwrap();
    repo.update_execution_status(&failed.task_id, ExecutionStatus::Failed)
        .await
        .unwrap();
    assert!(repo.mark_consumed(&cancelled.task_id).await.unwrap());

    let mut deleted = repo.delete_finished(Utc::now()).await.unwrap();
    deleted.sort();
    let mut expected = vec![completed.task_id.clone(), failed.task_id.clone()];
    expected.sort();
    assert_eq!(deleted, expected);

    // 执行中的任务结束后仍能写回状态
    assert!(repo
        .update_execution_status(&running.task_id, ExecutionStatus::Completed)
        .await
        .unwrap());
    assert!(repo.get_by_id(&cancelled.task_id).await.unwrap().is_some());

    let deleted = repo.delete_finished(Utc::now()).await.unwrap();
    assert_eq!(deleted, vec![running.task_id.clone()]);
}

#[tokio::test]
async fn test_subject_scoped_operations() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let room_1 = Subject::new(1, "一号间");
    let room_11 = Subject::new(11, "十一号间");

    repo.create(&danmu(&room_1, 1, 10)).await.unwrap();
    repo.create(&danmu(&room_1, 2, 20)).await.unwrap();
    repo.create(&danmu(&room_11, 1, 10)).await.unwrap();
    repo.create(&reminder(room_1.clone(), 60)).await.unwrap();

    let deleted = repo
        .delete_pending_by_subject(1, TaskType::DanmuTask)
        .await
        .unwrap();
    assert_eq!(deleted.len(), 2);

    // 11 号间的任务不受 1 号间操作影响
    let consumed = repo.consume_pending_by_subject(1).await.unwrap();
    assert_eq!(consumed.len(), 1);
    assert!(consumed[0].starts_with("live_reminder_1_"));

    let remaining = repo.list_pending().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].payload.references_subject(11));
}

#[tokio::test]
async fn test_prefix_listing_treats_underscore_literally() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let subject = Subject::new(5, "E");
    let payload = TaskPayload::FollowBatch {
        subjects: vec![subject],
        dry_run: false,
    };
    let run_time = Utc::now() + Duration::seconds(60);
    let original = "follow_task_5_1700000000";

    repo.create(&Task::new(task_id::retry(original, 1), payload.clone(), run_time).with_retry_count(1))
        .await
        .unwrap();
    repo.create(&Task::new("followXtask_5_1700000000_retry_1", payload, run_time))
        .await
        .unwrap();

    let retries = repo
        .list_by_id_prefix(&task_id::retry_prefix(original), true)
        .await
        .unwrap();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].task_id, "follow_task_5_1700000000_retry_1");
}

#[tokio::test]
async fn test_execution_stats_and_danmu_progress() {
    let (_dir, db) = setup_database().await;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let subject = Subject::new(9, "统计间");
    let follow = Task::new(
        "follow_task_9_1",
        TaskPayload::FollowBatch {
            subjects: vec![subject.clone()],
            dry_run: false,
        },
        Utc::now(),
    );
    let retry = Task::new(task_id::retry(&follow.task_id, 1), follow.payload.clone(), Utc::now())
        .with_retry_count(1);
    repo.create(&follow).await.unwrap();
    repo.create(&retry).await.unwrap();
    repo.update_execution_status(&follow.task_id, ExecutionStatus::Failed)
        .await
        .unwrap();
    repo.try_consume(&retry.task_id).await.unwrap();
    repo.update_execution_status(&retry.task_id, ExecutionStatus::Completed)
        .await
        .unwrap();

    let stats = repo.execution_stats().await.unwrap();
    assert_eq!(stats.total_follow_tasks, 2);
    assert_eq!(stats.retry_tasks, 1);
    assert_eq!(stats.success_rate, 50.0);

    let retries = repo.list_retry_tasks().await.unwrap();
    assert_eq!(retries.len(), 1);

    let first = danmu(&subject, 1, 1);
    let second = danmu(&subject, 2, 2);
    let third = danmu(&subject, 3, 3);
    for task in [&first, &second, &third] {
        repo.create(task).await.unwrap();
    }
    repo.try_consume(&first.task_id).await.unwrap();
    repo.update_execution_status(&first.task_id, ExecutionStatus::Completed)
        .await
        .unwrap();
    repo.try_consume(&second.task_id).await.unwrap();
    repo.update_execution_status(&second.task_id, ExecutionStatus::Failed)
        .await
        .unwrap();

    let progress = repo.danmu_progress(9).await.unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.remaining, 1);
    assert!(!progress.is_finished());
}

#[tokio::test]
async fn test_task_log_append_and_list() {
    let (_dir, db) = setup_database().await;
    let logs = SqliteTaskLogRepository::new(db.pool().clone());
    let subject = Subject::new(7, "日志间");

    let first = logs
        .append(&NewTaskLog::success("task_a", "进入直播间成功").with_subject(&subject))
        .await
        .unwrap();
    logs.append(&NewTaskLog::failure("task_b", "直播间未开播"))
        .await
        .unwrap();

    assert!(first.id > 0);
    assert_eq!(first.subject_id, Some(7));

    let recent = logs.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].task_id, "task_b");
    assert_eq!(recent[0].outcome, TaskOutcome::Failure);
    assert_eq!(recent[0].subject_name, None);

    let by_task = logs.list_by_task("task_a").await.unwrap();
    assert_eq!(by_task.len(), 1);
    assert_eq!(by_task[0].subject_name.as_deref(), Some("日志间"));
}

#[tokio::test]
async fn test_room_directory_queries() {
    let (_dir, db) = setup_database().await;
    let rooms = SqliteRoomDirectory::new(db.pool().clone());

    let subject = Subject::new(21, "话术间");
    rooms.upsert_room(&subject, false).await.unwrap();
    rooms.upsert_room(&Subject::new(22, "另一间"), false).await.unwrap();
    rooms.add_speech(21, "第二句", 2).await.unwrap();
    rooms.add_speech(21, "第一句", 1).await.unwrap();

    assert_eq!(rooms.find_subject(21).await.unwrap(), Some(subject.clone()));
    assert_eq!(rooms.find_subject(99).await.unwrap(), None);
    assert_eq!(
        rooms.get_room_speeches(&subject).await.unwrap(),
        vec!["第一句".to_string(), "第二句".to_string()]
    );

    let resolved = rooms.get_room_subjects(&[22, 99, 21]).await.unwrap();
    let ids: Vec<i64> = resolved.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![22, 21]);

    rooms
        .add_live_time(&LiveTimeSlot {
            subject_id: 21,
            live_time: Utc::now() + Duration::hours(1),
            remark: "晚场".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(rooms.pending_live_times().await.unwrap().len(), 1);

    assert!(rooms.mark_live_started(21).await.unwrap());
    assert!(!rooms.mark_live_started(21).await.unwrap());
    assert!(rooms.pending_live_times().await.unwrap().is_empty());
}
