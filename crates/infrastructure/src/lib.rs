//! # SQLite 持久化
//!
//! 任务表、执行日志表以及直播间业务表的 SQLite 实现。

pub mod database;

pub use database::{DatabaseManager, SqliteRoomDirectory, SqliteTaskLogRepository, SqliteTaskRepository};
