use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livefollow_core::{
    models::{
        ConsumeOutcome, DanmuProgress, ExecutionStatus, Task, TaskExecutionStats, TaskPayload,
        TaskStatus, TaskType,
    },
    traits::TaskRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument, warn};

use super::{from_millis, subject_pattern, to_millis};

const TASK_COLUMNS: &str = "task_id, task_type, payload, run_time, created_time, status, \
                            execution_status, retry_count, remark";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let task_type: String = row.try_get("task_type")?;
        let payload: String = row.try_get("payload")?;
        let execution_status: String = row.try_get("execution_status")?;
        let payload: TaskPayload = serde_json::from_str(&payload)?;

        Ok(Task {
            task_id: row.try_get("task_id")?,
            task_type: task_type.parse()?,
            payload,
            run_time: from_millis(row.try_get("run_time")?)?,
            created_time: from_millis(row.try_get("created_time")?)?,
            status: TaskStatus::from_i64(row.try_get("status")?)?,
            execution_status: execution_status.parse()?,
            retry_count: row.try_get("retry_count")?,
            remark: row.try_get("remark")?,
        })
    }

    fn rows_to_tasks(rows: Vec<SqliteRow>) -> SchedulerResult<Vec<Task>> {
        rows.iter().map(Self::row_to_task).collect()
    }

    fn rows_to_ids(rows: Vec<SqliteRow>) -> SchedulerResult<Vec<String>> {
        rows.iter()
            .map(|row| row.try_get("task_id").map_err(SchedulerError::from))
            .collect()
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type))]
    async fn create(&self, task: &Task) -> SchedulerResult<()> {
        let payload = serde_json::to_string(&task.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (task_id, task_type, subject_ids, payload, run_time, created_time,
                               status, execution_status, retry_count, remark)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(task.task_type.as_str())
        .bind(task.subject_ids_column())
        .bind(payload)
        .bind(to_millis(task.run_time))
        .bind(to_millis(task.created_time))
        .bind(task.status.as_i64())
        .bind(task.execution_status.as_str())
        .bind(task.retry_count)
        .bind(&task.remark)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("创建{}成功, 触发时间: {}", task.entity_description(), task.run_time);
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                warn!("任务ID已存在，拒绝重复创建: {}", task.task_id);
                Err(SchedulerError::duplicate_task_id(&task.task_id))
            }
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?");
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn load_pending(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 0 AND run_time >= ? ORDER BY run_time"
        );
        let rows = sqlx::query(&sql)
            .bind(to_millis(now))
            .fetch_all(&self.pool)
            .await?;

        let tasks = Self::rows_to_tasks(rows)?;
        debug!("加载待触发任务 {} 个", tasks.len());
        Ok(tasks)
    }

    async fn list_pending(&self) -> SchedulerResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status = 0 ORDER BY run_time");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Self::rows_to_tasks(rows)
    }

    #[instrument(skip(self))]
    async fn mark_consumed(&self, task_id: &str) -> SchedulerResult<bool> {
        let result = sqlx::query("UPDATE tasks SET status = 1 WHERE task_id = ? AND status = 0")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn try_consume(&self, task_id: &str) -> SchedulerResult<ConsumeOutcome> {
        // 单条UPDATE完成判断和翻转，并发调用只有一个能命中 status = 0
        let result = sqlx::query(
            "UPDATE tasks SET status = 1, execution_status = 'executing' \
             WHERE task_id = ? AND status = 0",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ConsumeOutcome::Granted);
        }

        let exists = sqlx::query("SELECT 1 FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        Ok(if exists {
            ConsumeOutcome::AlreadyConsumed
        } else {
            ConsumeOutcome::NotFound
        })
    }

    #[instrument(skip(self))]
    async fn delete_expired(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query(
            "DELETE FROM tasks WHERE status = 1 AND run_time < ? RETURNING task_id",
        )
        .bind(to_millis(before))
        .fetch_all(&self.pool)
        .await?;

        let ids = Self::rows_to_ids(rows)?;
        if !ids.is_empty() {
            debug!("清理过期任务 {} 个", ids.len());
        }
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn delete_finished(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query(
            "DELETE FROM tasks WHERE status = 1 AND run_time < ? \
             AND execution_status NOT IN ('pending', 'executing') RETURNING task_id",
        )
        .bind(to_millis(before))
        .fetch_all(&self.pool)
        .await?;

        let ids = Self::rows_to_ids(rows)?;
        if !ids.is_empty() {
            debug!("清理已结束任务 {} 个", ids.len());
        }
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn drop_stale_pending(&self, before: DateTime<Utc>) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query(
            "UPDATE tasks SET status = 1 WHERE status = 0 AND run_time < ? RETURNING task_id",
        )
        .bind(to_millis(before))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_ids(rows)
    }

    #[instrument(skip(self, task_ids), fields(count = task_ids.len()))]
    async fn delete_pending(&self, task_ids: &[String]) -> SchedulerResult<u64> {
        if task_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM tasks WHERE status = 0 AND task_id IN (");
        let mut separated = builder.separated(", ");
        for task_id in task_ids {
            separated.push_bind(task_id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn update_execution_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET execution_status = ?, last_execution_time = ? WHERE task_id = ?",
        )
        .bind(status.as_str())
        .bind(to_millis(Utc::now()))
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn consume_pending_by_subject(&self, subject_id: i64) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query(
            "UPDATE tasks SET status = 1 WHERE status = 0 AND subject_ids LIKE ? RETURNING task_id",
        )
        .bind(subject_pattern(subject_id))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_ids(rows)
    }

    #[instrument(skip(self))]
    async fn delete_pending_by_subject(
        &self,
        subject_id: i64,
        task_type: TaskType,
    ) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query(
            "DELETE FROM tasks WHERE status = 0 AND task_type = ? AND subject_ids LIKE ? \
             RETURNING task_id",
        )
        .bind(task_type.as_str())
        .bind(subject_pattern(subject_id))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_ids(rows)
    }

    async fn list_by_id_prefix(
        &self,
        prefix: &str,
        pending_only: bool,
    ) -> SchedulerResult<Vec<Task>> {
        // 任务ID里含有下划线，LIKE 会把它当通配符，这里用 instr 做精确前缀匹配
        let sql = if pending_only {
            format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE instr(task_id, ?) = 1 AND status = 0 \
                 ORDER BY run_time"
            )
        } else {
            format!("SELECT {TASK_COLUMNS} FROM tasks WHERE instr(task_id, ?) = 1 ORDER BY run_time")
        };

        let rows = sqlx::query(&sql).bind(prefix).fetch_all(&self.pool).await?;
        Self::rows_to_tasks(rows)
    }

    async fn list_retry_tasks(&self) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 1 AND retry_count > 0 \
             ORDER BY created_time DESC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Self::rows_to_tasks(rows)
    }

    #[instrument(skip(self))]
    async fn execution_stats(&self) -> SchedulerResult<TaskExecutionStats> {
        let rows = sqlx::query(
            "SELECT execution_status, COUNT(*) AS count FROM tasks \
             WHERE task_type = 'follow_task' GROUP BY execution_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut status_counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("execution_status")?;
            let count: i64 = row.try_get("count")?;
            status_counts.insert(status, count.max(0) as u64);
        }

        let retry_tasks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE task_type = 'follow_task' AND retry_count > 0",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TaskExecutionStats::from_counts(
            status_counts,
            retry_tasks.max(0) as u64,
        ))
    }

    #[instrument(skip(self))]
    async fn danmu_progress(&self, subject_id: i64) -> SchedulerResult<DanmuProgress> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN execution_status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN execution_status IN ('failed', 'error') THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END), 0) AS remaining
            FROM tasks
            WHERE task_type = 'danmu_task' AND subject_ids LIKE ?
            "#,
        )
        .bind(subject_pattern(subject_id))
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> SchedulerResult<u64> {
            let value: i64 = row.try_get(column)?;
            Ok(value.max(0) as u64)
        };

        Ok(DanmuProgress {
            total: count("total")?,
            completed: count("completed")?,
            failed: count("failed")?,
            remaining: count("remaining")?,
        })
    }
}
