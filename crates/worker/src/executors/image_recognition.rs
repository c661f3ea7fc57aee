use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use livefollow_core::{
    models::{ExecutionStatus, PayloadKind, Subject, Task, TaskPayload},
    progress::ProgressLogEntry,
    traits::{MatchOutcome, SendMode, TaskHandler},
    SchedulerError, SchedulerResult,
};

use super::unexpected_payload;
use crate::context::HandlerContext;

/// 图像识别
///
/// 每次尝试只写一条执行日志。未识别到商品、直播间未开播或自动化失败时
/// 派生下一次识别，识别成功后按绑定话术生成弹幕任务。
pub struct ImageRecognitionExecutor {
    ctx: Arc<HandlerContext>,
}

impl ImageRecognitionExecutor {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn retry_later(
        &self,
        task: &Task,
        subject: &Subject,
        attempt: u32,
        dry_run: bool,
        reason: &str,
    ) -> SchedulerResult<ExecutionStatus> {
        self.ctx.log_failure(task, Some(subject), reason).await;
        let next = self
            .ctx
            .retry
            .schedule_next_recognition(task, subject, attempt, dry_run)
            .await?;
        if next.is_none() {
            self.ctx.progress.append(
                ProgressLogEntry::warning(format!("直播间 {} 图像识别次数已用完", subject.name))
                    .with_subject(subject),
            );
        }
        Ok(ExecutionStatus::Failed)
    }
}

#[async_trait]
impl TaskHandler for ImageRecognitionExecutor {
    fn name(&self) -> &'static str {
        "image_recognition"
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::ImageRecognition
    }

    async fn handle(&self, task: &Task) -> SchedulerResult<ExecutionStatus> {
        let TaskPayload::ImageRecognition {
            subject: planned,
            attempt,
            dry_run,
        } = &task.payload
        else {
            return Err(unexpected_payload(self.name(), task));
        };
        let (attempt, dry_run) = (*attempt, *dry_run);
        let ctx = &self.ctx;

        let Some(subject) = ctx.rooms.find_subject(planned.id).await? else {
            warn!("直播间已不存在，停止图像识别: {}", planned);
            ctx.log_failure(task, Some(planned), "直播间不存在，停止图像识别")
                .await;
            return Ok(ExecutionStatus::Failed);
        };

        debug!("直播间 {} 第 {} 次图像识别", subject, attempt + 1);
        if let Err(e) = ctx.enter(&subject, SendMode::from_dry_run(dry_run)).await {
            let reason = format!("{e}，稍后继续识别");
            return self.retry_later(task, &subject, attempt, dry_run, &reason).await;
        }

        let image = match ctx.match_image(&subject).await {
            Ok(MatchOutcome::Matched(image)) => image,
            Ok(MatchOutcome::NoMatch) => {
                return self
                    .retry_later(task, &subject, attempt, dry_run, "未识别到商品图片")
                    .await;
            }
            Ok(MatchOutcome::Unavailable(e)) => {
                let error = SchedulerError::AutomationUnavailable(e);
                let reason = format!("图像识别失败：{error}");
                return self.retry_later(task, &subject, attempt, dry_run, &reason).await;
            }
            Err(e) => {
                let reason = format!("图像识别失败：{e}");
                return self.retry_later(task, &subject, attempt, dry_run, &reason).await;
            }
        };

        let speeches = ctx.rooms.get_room_speeches(&subject).await?;
        if speeches.is_empty() {
            warn!("直播间 {} 识别成功但没有绑定话术", subject);
            ctx.log_failure(task, Some(&subject), "匹配成功但未绑定话术")
                .await;
            ctx.progress.append(
                ProgressLogEntry::warning(format!("直播间 {} 未绑定话术", subject.name))
                    .with_subject(&subject),
            );
            return Ok(ExecutionStatus::Completed);
        }

        info!("直播间 {} 识别到商品图片 {}", subject, image);
        ctx.log_success(
            task,
            Some(&subject),
            &format!("识别到商品图片 {}，准备发送 {} 条话术", image, speeches.len()),
        )
        .await;
        ctx.progress.append(
            ProgressLogEntry::success(format!("识别成功，准备发送 {} 条话术", speeches.len()))
                .with_percent(80)
                .with_step("发送话术")
                .with_subject(&subject),
        );
        ctx.retry
            .schedule_danmu_batch(&subject, &speeches, Some(image), dry_run)
            .await?;
        Ok(ExecutionStatus::Completed)
    }
}
