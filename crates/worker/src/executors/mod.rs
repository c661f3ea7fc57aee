//! 按任务负载类型划分的执行器

mod danmu_send;
mod follow_batch;
mod image_recognition;
mod live_reminder;

pub use danmu_send::DanmuSendExecutor;
pub use follow_batch::FollowBatchExecutor;
pub use image_recognition::ImageRecognitionExecutor;
pub use live_reminder::LiveReminderExecutor;

use livefollow_core::{models::Task, SchedulerError};

fn unexpected_payload(handler: &str, task: &Task) -> SchedulerError {
    SchedulerError::InvalidTaskParams(format!(
        "{} 无法处理 {} 的负载",
        handler,
        task.entity_description()
    ))
}
