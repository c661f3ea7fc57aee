use async_trait::async_trait;
use chrono::Utc;
use livefollow_core::{
    models::{LiveTimeSlot, Subject},
    traits::RoomDirectory,
    SchedulerResult,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::{from_millis, to_millis};

/// 直播间、话术和开播时间表的只读查询
///
/// 这几张表由业务界面维护，任务引擎只读取，
/// 唯一的写操作是开播提醒触发时把对应的开播记录标记为已开播。
pub struct SqliteRoomDirectory {
    pool: SqlitePool,
}

impl SqliteRoomDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 新增或更新直播间
    pub async fn upsert_room(&self, subject: &Subject, is_live: bool) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO rooms (id, name, is_live) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, is_live = excluded.is_live",
        )
        .bind(subject.id)
        .bind(&subject.name)
        .bind(is_live)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_speech(&self, subject_id: i64, content: &str, sort_order: i64) -> SchedulerResult<()> {
        sqlx::query("INSERT INTO room_speeches (room_id, content, sort_order) VALUES (?, ?, ?)")
            .bind(subject_id)
            .bind(content)
            .bind(sort_order)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_live_time(&self, slot: &LiveTimeSlot) -> SchedulerResult<()> {
        sqlx::query("INSERT INTO time_of_live (room_id, live_time, status, remark) VALUES (?, ?, 0, ?)")
            .bind(slot.subject_id)
            .bind(to_millis(slot.live_time))
            .bind(&slot.remark)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for SqliteRoomDirectory {
    async fn find_subject(&self, subject_id: i64) -> SchedulerResult<Option<Subject>> {
        let row = sqlx::query("SELECT id, name FROM rooms WHERE id = ?")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Subject::new(row.try_get("id")?, row.try_get::<String, _>("name")?))),
            None => Ok(None),
        }
    }

    async fn get_room_speeches(&self, subject: &Subject) -> SchedulerResult<Vec<String>> {
        let speeches: Vec<String> = sqlx::query_scalar(
            "SELECT content FROM room_speeches WHERE room_id = ? ORDER BY sort_order, id",
        )
        .bind(subject.id)
        .fetch_all(&self.pool)
        .await?;

        debug!("直播间 {} 绑定话术 {} 条", subject, speeches.len());
        Ok(speeches)
    }

    async fn get_room_subjects(&self, subject_ids: &[i64]) -> SchedulerResult<Vec<Subject>> {
        if subject_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name FROM rooms WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in subject_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            found.push(Subject::new(row.try_get("id")?, row.try_get::<String, _>("name")?));
        }

        // 保持调用方给出的顺序
        let mut subjects = Vec::with_capacity(found.len());
        for id in subject_ids {
            if let Some(subject) = found.iter().find(|s| s.id == *id) {
                if !subjects.contains(subject) {
                    subjects.push(subject.clone());
                }
            }
        }
        Ok(subjects)
    }

    #[instrument(skip(self))]
    async fn mark_live_started(&self, subject_id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE time_of_live SET status = 1
            WHERE id = (
                SELECT id FROM time_of_live
                WHERE room_id = ? AND status = 0
                ORDER BY live_time
                LIMIT 1
            )
            "#,
        )
        .bind(subject_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE rooms SET is_live = 1 WHERE id = ?")
                .bind(subject_id)
                .execute(&self.pool)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn pending_live_times(&self) -> SchedulerResult<Vec<LiveTimeSlot>> {
        let rows = sqlx::query(
            "SELECT room_id, live_time, remark FROM time_of_live \
             WHERE status = 0 AND live_time > ? ORDER BY live_time",
        )
        .bind(to_millis(Utc::now()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LiveTimeSlot {
                    subject_id: row.try_get("room_id")?,
                    live_time: from_millis(row.try_get("live_time")?)?,
                    remark: row.try_get("remark")?,
                })
            })
            .collect()
    }
}
