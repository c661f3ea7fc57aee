use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use livefollow_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// SQLite 连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 创建连接池并运行迁移
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("创建SQLite数据库连接池: {}", config.url);

        // 启用WAL模式，读写可以并发进行
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .context("解析数据库URL失败")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await
            .context("创建数据库连接池失败")?;

        let manager = Self { pool };
        manager.migrate().await.context("运行数据库迁移失败")?;
        Ok(manager)
    }

    /// 复用已有的连接池
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("运行数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                subject_ids TEXT NOT NULL,
                payload TEXT NOT NULL,
                run_time INTEGER NOT NULL,
                created_time INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                execution_status TEXT NOT NULL DEFAULT 'pending',
                last_execution_time INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                remark TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建任务表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                message TEXT NOT NULL,
                room_id INTEGER,
                room_name TEXT,
                execution_time INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建任务日志表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                is_live INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建直播间表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS room_speeches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建话术表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS time_of_live (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                live_time INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                remark TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建开播时间表失败")?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_run_time ON tasks(status, run_time)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_task_type ON tasks(task_type)",
            "CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id)",
            "CREATE INDEX IF NOT EXISTS idx_room_speeches_room_id ON room_speeches(room_id)",
            "CREATE INDEX IF NOT EXISTS idx_time_of_live_room_status ON time_of_live(room_id, status)",
        ];
        for statement in indexes {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("创建索引失败: {statement}"))?;
        }

        info!("✅ 数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
