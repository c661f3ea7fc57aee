pub mod sqlite_room_directory;
pub mod sqlite_task_log_repository;
pub mod sqlite_task_repository;

pub use sqlite_room_directory::SqliteRoomDirectory;
pub use sqlite_task_log_repository::SqliteTaskLogRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use chrono::{DateTime, TimeZone, Utc};
use livefollow_core::{SchedulerError, SchedulerResult};

/// 时间统一以毫秒时间戳存储，SQL 比较按数值进行
pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> SchedulerResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| SchedulerError::Serialization(format!("无效的时间戳: {millis}")))
}

pub(crate) fn subject_pattern(subject_id: i64) -> String {
    format!("%,{subject_id},%")
}
