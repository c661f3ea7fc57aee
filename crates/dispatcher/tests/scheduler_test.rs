#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use livefollow_core::config::SchedulerConfig;
    use livefollow_core::models::ExecutionStatus;
    use livefollow_core::traits::{SchedulerHandle, TaskDispatch, TaskRepository};
    use livefollow_core::SchedulerError;
    use livefollow_dispatcher::{IdempotencyGuard, TimerScheduler};
    use livefollow_testing_utils::{MockTaskRepository, TaskBuilder};

    /// 通过幂等守卫后记录触发时间
    struct RecordingDispatch {
        guard: IdempotencyGuard,
        fired: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
        work: StdDuration,
    }

    impl RecordingDispatch {
        fn new(repo: &MockTaskRepository, work: StdDuration) -> Arc<Self> {
            Arc::new(Self {
                guard: IdempotencyGuard::new(Arc::new(repo.clone())),
                fired: Mutex::new(Vec::new()),
                work,
            })
        }

        fn fired_ids(&self) -> Vec<String> {
            self.fired
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _, _)| id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TaskDispatch for RecordingDispatch {
        async fn dispatch(&self, task_id: &str) {
            if !self.guard.try_consume(task_id).await.unwrap().is_granted() {
                return;
            }
            let started = Utc::now();
            tokio::time::sleep(self.work).await;
            self.fired
                .lock()
                .unwrap()
                .push((task_id.to_string(), started, Utc::now()));
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_executions: 2,
            stale_task_threshold_seconds: 60,
            expired_retention_seconds: 0,
            ..SchedulerConfig::default()
        }
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(StdDuration::from_millis(ms)).await;
    }

    #[tokio::test]
    async fn test_restart_recovers_pending_and_drops_stale() {
        let future = TaskBuilder::new()
            .with_id("future")
            .run_in(Duration::milliseconds(200))
            .build();
        let stale = TaskBuilder::new()
            .with_id("stale")
            .run_in(Duration::minutes(-10))
            .build();
        let finished = TaskBuilder::new()
            .with_id("finished")
            .run_in(Duration::minutes(-5))
            .consumed()
            .build();
        let repo = MockTaskRepository::with_tasks(vec![future, stale, finished]);

        let dispatch = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        let report = scheduler.start(dispatch.clone()).await.unwrap();

        assert_eq!(report.armed, 1);
        assert_eq!(report.stale_dropped, vec!["stale".to_string()]);
        assert_eq!(report.expired_deleted, 2);
        assert!(scheduler.is_scheduled("future").await);
        assert!(repo.get("stale").is_none());

        settle(500).await;
        assert_eq!(dispatch.fired_ids(), vec!["future".to_string()]);
        assert!(!scheduler.is_scheduled("future").await);

        // 重启后已消费的任务不会再次触发
        let restarted = TimerScheduler::new(Arc::new(repo.clone()), config());
        let dispatch_after_restart = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let report = restarted.start(dispatch_after_restart.clone()).await.unwrap();
        assert_eq!(report.armed, 0);
        settle(100).await;
        assert!(dispatch_after_restart.fired_ids().is_empty());
    }

    #[tokio::test]
    async fn test_restart_fires_every_pending_task_exactly_once() {
        let repo = MockTaskRepository::new();
        let ids = ["first", "second", "third"];
        for (offset, id) in ids.iter().enumerate() {
            let task = TaskBuilder::new()
                .with_id(id)
                .run_in(Duration::milliseconds(300 + offset as i64 * 100))
                .build();
            repo.create(&task).await.unwrap();
        }

        let before_restart = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        assert_eq!(scheduler.start(before_restart.clone()).await.unwrap().armed, 3);
        scheduler.shutdown(StdDuration::from_secs(1)).await;
        assert_eq!(scheduler.armed_count(), 0);

        let dispatch = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let restarted = TimerScheduler::new(Arc::new(repo.clone()), config());
        let report = restarted.start(dispatch.clone()).await.unwrap();
        assert_eq!(report.armed, 3);
        assert!(report.stale_dropped.is_empty());

        settle(900).await;
        assert!(before_restart.fired_ids().is_empty());
        let mut fired = dispatch.fired_ids();
        fired.sort();
        let mut expected: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        expected.sort();
        assert_eq!(fired, expected);
        for id in ids {
            assert!(!repo.get(id).unwrap().is_pending());
        }
        assert_eq!(restarted.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_requires_running_and_rejects_duplicates() {
        let repo = MockTaskRepository::new();
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        let task = TaskBuilder::new().run_in(Duration::minutes(5)).build();
        repo.create(&task).await.unwrap();

        let err = scheduler.schedule(&task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerNotRunning));

        scheduler
            .start(RecordingDispatch::new(&repo, StdDuration::ZERO))
            .await
            .unwrap();
        assert!(scheduler.is_scheduled(&task.task_id).await);

        let err = scheduler.schedule(&task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::TimerAlreadyArmed { .. }));
        assert_eq!(scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_fire() {
        let repo = MockTaskRepository::new();
        let dispatch = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        scheduler.start(dispatch.clone()).await.unwrap();

        let task = TaskBuilder::new().run_in(Duration::milliseconds(200)).build();
        repo.create(&task).await.unwrap();
        scheduler.schedule(&task).await.unwrap();

        assert!(scheduler.cancel(&task.task_id).await.unwrap());
        assert!(!scheduler.cancel(&task.task_id).await.unwrap());
        assert!(!repo.get(&task.task_id).unwrap().is_pending());

        settle(400).await;
        assert!(dispatch.fired_ids().is_empty());
    }

    #[tokio::test]
    async fn test_misfired_timer_is_skipped() {
        let repo = MockTaskRepository::new();
        let dispatch = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        scheduler.start(dispatch.clone()).await.unwrap();

        let late = TaskBuilder::new().run_in(Duration::minutes(-2)).build();
        repo.create(&late).await.unwrap();
        scheduler.schedule(&late).await.unwrap();

        settle(100).await;
        assert!(dispatch.fired_ids().is_empty());
        assert!(repo.get(&late.task_id).unwrap().is_pending());
        assert!(!scheduler.is_scheduled(&late.task_id).await);
    }

    #[tokio::test]
    async fn test_reconcile_adopts_purges_and_drops_orphans() {
        let repo = MockTaskRepository::new();
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        scheduler
            .start(RecordingDispatch::new(&repo, StdDuration::ZERO))
            .await
            .unwrap();

        let orphan = TaskBuilder::new()
            .with_id("orphan")
            .run_in(Duration::minutes(5))
            .build();
        repo.create(&orphan).await.unwrap();
        scheduler.schedule(&orphan).await.unwrap();
        repo.mark_consumed("orphan").await.unwrap();

        // 其他进程写入的任务
        let external = TaskBuilder::new()
            .with_id("external")
            .run_in(Duration::minutes(5))
            .build();
        let abandoned = TaskBuilder::new()
            .with_id("abandoned")
            .run_in(Duration::minutes(-30))
            .build();
        let recent_miss = TaskBuilder::new()
            .with_id("recent_miss")
            .run_in(Duration::seconds(-10))
            .build();
        for task in [&external, &abandoned, &recent_miss] {
            repo.create(task).await.unwrap();
        }

        let report = scheduler.reconcile().await.unwrap();
        assert_eq!(report.orphan_timers, 1);
        assert_eq!(report.stale_rows_deleted, 1);
        assert_eq!(report.adopted, 1);

        assert!(!scheduler.is_scheduled("orphan").await);
        assert!(scheduler.is_scheduled("external").await);
        assert!(repo.get("abandoned").is_none());
        assert!(repo.get("recent_miss").is_some());

        assert!(scheduler.reconcile().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_timer_armed_during_reconcile_is_kept() {
        let repo = MockTaskRepository::new().with_list_delay(StdDuration::from_millis(200));
        let dispatch = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let scheduler = Arc::new(TimerScheduler::new(Arc::new(repo.clone()), config()));
        scheduler.start(dispatch.clone()).await.unwrap();

        let reconciling = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.reconcile().await })
        };
        settle(50).await;

        // 执行器在对账读取存储之后派生的新任务
        let chained = TaskBuilder::new()
            .with_id("chained")
            .run_in(Duration::milliseconds(500))
            .build();
        repo.create(&chained).await.unwrap();
        scheduler.schedule(&chained).await.unwrap();

        let report = reconciling.await.unwrap().unwrap();
        assert_eq!(report.orphan_timers, 0);
        assert!(scheduler.is_scheduled("chained").await);

        settle(700).await;
        assert_eq!(dispatch.fired_ids(), vec!["chained".to_string()]);
    }

    #[tokio::test]
    async fn test_periodic_purge_keeps_executing_task() {
        let repo = MockTaskRepository::new();
        let dispatch = RecordingDispatch::new(&repo, StdDuration::from_millis(400));
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        scheduler.start(dispatch.clone()).await.unwrap();

        let task = TaskBuilder::new().run_in(Duration::milliseconds(50)).build();
        repo.create(&task).await.unwrap();
        scheduler.schedule(&task).await.unwrap();

        settle(200).await;
        assert_eq!(
            repo.get(&task.task_id).unwrap().execution_status,
            ExecutionStatus::Executing
        );
        assert_eq!(scheduler.delete_finished(Utc::now()).await.unwrap(), 0);
        assert!(repo.get(&task.task_id).is_some());

        settle(400).await;
        assert_eq!(dispatch.fired_ids(), vec![task.task_id.clone()]);
        repo.update_execution_status(&task.task_id, ExecutionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(scheduler.delete_finished(Utc::now()).await.unwrap(), 1);
        assert!(repo.get(&task.task_id).is_none());
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let repo = MockTaskRepository::new();
        let dispatch = RecordingDispatch::new(&repo, StdDuration::from_millis(150));
        let scheduler = TimerScheduler::new(
            Arc::new(repo.clone()),
            SchedulerConfig {
                max_concurrent_executions: 1,
                ..config()
            },
        );
        scheduler.start(dispatch.clone()).await.unwrap();

        let run_time = Utc::now() + Duration::milliseconds(50);
        for id in ["a", "b"] {
            let task = TaskBuilder::new().with_id(id).with_run_time(run_time).build();
            repo.create(&task).await.unwrap();
            scheduler.schedule(&task).await.unwrap();
        }

        settle(600).await;
        let fired = dispatch.fired.lock().unwrap().clone();
        assert_eq!(fired.len(), 2);
        let (first, second) = if fired[0].1 <= fired[1].1 {
            (&fired[0], &fired[1])
        } else {
            (&fired[1], &fired[0])
        };
        assert!(second.1 >= first.2);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_timers() {
        let repo = MockTaskRepository::new();
        let dispatch = RecordingDispatch::new(&repo, StdDuration::ZERO);
        let scheduler = TimerScheduler::new(Arc::new(repo.clone()), config());
        scheduler.start(dispatch.clone()).await.unwrap();

        let task = TaskBuilder::new().run_in(Duration::milliseconds(100)).build();
        repo.create(&task).await.unwrap();
        scheduler.schedule(&task).await.unwrap();

        scheduler.shutdown(StdDuration::from_secs(1)).await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.armed_count(), 0);

        settle(300).await;
        assert!(dispatch.fired_ids().is_empty());
        assert!(repo.get(&task.task_id).unwrap().is_pending());
    }
}
