//! 任务ID生成规则
//!
//! 任务ID由类型、直播间和时间戳拼接而成，同时作为幂等键和调度器的定时器句柄。
//! 面向用户创建的任务使用秒级时间戳，链式派生的任务使用毫秒级时间戳并带序号，
//! 避免同一秒内派生的任务互相冲突。

use chrono::{DateTime, Utc};

const RETRY_MARKER: &str = "_retry_";

fn join_ids(subject_ids: &[i64]) -> String {
    subject_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn live_reminder(subject_id: i64, run_time: DateTime<Utc>) -> String {
    format!("live_reminder_{}_{}", subject_id, run_time.timestamp())
}

pub fn follow_task(subject_ids: &[i64], created: DateTime<Utc>) -> String {
    format!("follow_task_{}_{}", join_ids(subject_ids), created.timestamp())
}

pub fn test_follow_task(subject_ids: &[i64], created: DateTime<Utc>) -> String {
    format!(
        "test_follow_task_{}_{}",
        join_ids(subject_ids),
        created.timestamp()
    )
}

pub fn image_recognition(subject_id: i64, run_time: DateTime<Utc>, attempt: u32) -> String {
    format!(
        "image_recognition_{}_{}_{}",
        subject_id,
        run_time.timestamp_millis(),
        attempt
    )
}

/// `index` 从1开始
pub fn danmu_task(subject_id: i64, batch_time: DateTime<Utc>, index: u32) -> String {
    format!(
        "danmu_task_{}_{}_{}",
        subject_id,
        batch_time.timestamp_millis(),
        index
    )
}

/// 去掉已有的重试后缀，得到原始任务ID
pub fn retry_base(task_id: &str) -> &str {
    match task_id.find(RETRY_MARKER) {
        Some(pos) => &task_id[..pos],
        None => task_id,
    }
}

pub fn retry(original_task_id: &str, retry_count: i32) -> String {
    format!("{}{}{}", retry_base(original_task_id), RETRY_MARKER, retry_count)
}

pub fn retry_prefix(original_task_id: &str) -> String {
    format!("{}{}", retry_base(original_task_id), RETRY_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_user_facing_ids() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(live_reminder(74, at), "live_reminder_74_1700000000");
        assert_eq!(follow_task(&[1, 2, 3], at), "follow_task_1_2_3_1700000000");
        assert_eq!(test_follow_task(&[5], at), "test_follow_task_5_1700000000");
    }

    #[test]
    fn test_retry_ids_do_not_nest() {
        let first = retry("follow_task_1_1700000000", 1);
        assert_eq!(first, "follow_task_1_1700000000_retry_1");
        let second = retry(&first, 2);
        assert_eq!(second, "follow_task_1_1700000000_retry_2");
        assert_eq!(retry_prefix(&second), "follow_task_1_1700000000_retry_");
    }

    #[test]
    fn test_chained_ids_are_distinct() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_ne!(image_recognition(3, at, 0), image_recognition(3, at, 1));
        assert_eq!(danmu_task(3, at, 2), "danmu_task_3_1700000000123_2");
    }
}
