use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use livefollow_core::{
    models::{ExecutionStatus, PayloadKind, Task, TaskPayload},
    progress::ProgressLogEntry,
    traits::{SendMode, TaskHandler},
    SchedulerResult,
};

use super::unexpected_payload;
use crate::context::HandlerContext;

/// 开播提醒：标记开播、通知用户，然后对单个直播间跟播
pub struct LiveReminderExecutor {
    ctx: Arc<HandlerContext>,
}

impl LiveReminderExecutor {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for LiveReminderExecutor {
    fn name(&self) -> &'static str {
        "live_reminder"
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::LiveReminder
    }

    async fn handle(&self, task: &Task) -> SchedulerResult<ExecutionStatus> {
        let TaskPayload::LiveReminder { subject: planned } = &task.payload else {
            return Err(unexpected_payload(self.name(), task));
        };
        let ctx = &self.ctx;

        let Some(subject) = ctx.rooms.find_subject(planned.id).await? else {
            warn!("开播提醒的直播间已不存在: {}", planned);
            ctx.log_failure(task, Some(planned), "直播间不存在，无法跟播").await;
            return Ok(ExecutionStatus::Failed);
        };

        if !ctx.rooms.mark_live_started(subject.id).await? {
            debug!("直播间 {} 没有待开播记录", subject);
        }

        let mut message = format!("直播间 {} 开播时间到！\n即将开始自动跟播", subject.name);
        if !task.remark.is_empty() {
            message.push('\n');
            message.push_str(&task.remark);
        }
        ctx.notify("🚀 开始跟播", &message).await;

        ctx.progress.begin_batch(1, "开播跟播");
        ctx.progress.set_current_subject(Some(&subject));
        ctx.progress.append(
            ProgressLogEntry::info(format!("开播提醒触发，正在进入直播间 {}", subject.name))
                .with_percent(20)
                .with_step("进入直播间")
                .with_subject(&subject),
        );

        let reason = match ctx.enter(&subject, SendMode::Commit).await {
            Ok(()) => {
                info!("开播跟播成功: {}", subject);
                ctx.log_success(task, Some(&subject), "开播跟播：进入直播间成功")
                    .await;
                ctx.progress.advance_completed();
                ctx.retry.chain_recognition(&subject, false).await?;
                ctx.progress.append(
                    ProgressLogEntry::success(format!("已进入直播间 {}，开始图像识别", subject.name))
                        .with_subject(&subject),
                );
                ctx.progress.finish(65, "图像识别监控中", 1);
                return Ok(ExecutionStatus::Completed);
            }
            Err(e) => e.to_string(),
        };

        warn!("开播跟播失败: {} - {}", subject, reason);
        ctx.log_failure(task, Some(&subject), &reason).await;
        ctx.progress.append(
            ProgressLogEntry::error(format!("{}：{}", subject.name, reason)).with_subject(&subject),
        );
        ctx.progress.finish(0, "跟播失败", 0);

        let rooms = [subject];
        ctx.retry
            .schedule_follow_retry(task, &rooms, &rooms, Some(&reason))
            .await?;
        Ok(ExecutionStatus::Failed)
    }
}
