use async_trait::async_trait;
use livefollow_core::{
    models::{NewTaskLog, TaskLogEntry, TaskOutcome},
    traits::TaskLogRepository,
    SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use super::{from_millis, to_millis};

pub struct SqliteTaskLogRepository {
    pool: SqlitePool,
}

impl SqliteTaskLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> SchedulerResult<TaskLogEntry> {
        Ok(TaskLogEntry {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            outcome: TaskOutcome::from_i64(row.try_get("status")?)?,
            message: row.try_get("message")?,
            subject_id: row.try_get("room_id")?,
            subject_name: row.try_get("room_name")?,
            execution_time: from_millis(row.try_get("execution_time")?)?,
        })
    }
}

#[async_trait]
impl TaskLogRepository for SqliteTaskLogRepository {
    #[instrument(skip(self, entry), fields(task_id = %entry.task_id))]
    async fn append(&self, entry: &NewTaskLog) -> SchedulerResult<TaskLogEntry> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_logs (task_id, status, message, room_id, room_name, execution_time)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.task_id)
        .bind(entry.outcome.as_i64())
        .bind(&entry.message)
        .bind(entry.subject_id)
        .bind(&entry.subject_name)
        .bind(to_millis(entry.execution_time))
        .execute(&self.pool)
        .await?;

        debug!("写入执行日志: {} - {}", entry.task_id, entry.message);
        Ok(entry.clone().into_entry(result.last_insert_rowid()))
    }

    async fn list_recent(&self, limit: u32) -> SchedulerResult<Vec<TaskLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, task_id, status, message, room_id, room_name, execution_time \
             FROM task_logs ORDER BY execution_time DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn list_by_task(&self, task_id: &str) -> SchedulerResult<Vec<TaskLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, task_id, status, message, room_id, room_name, execution_time \
             FROM task_logs WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
