use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use livefollow_core::{
    models::{ExecutionStatus, PayloadKind, Task, TaskPayload},
    progress::ProgressLogEntry,
    traits::{SendMode, SendOutcome, TaskHandler},
    SchedulerResult,
};

use super::unexpected_payload;
use crate::context::HandlerContext;

pub struct DanmuSendExecutor {
    ctx: Arc<HandlerContext>,
}

impl DanmuSendExecutor {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

fn danmu_percent(index: u32, total: u32) -> u8 {
    (85 + index * 10 / total.max(1)).min(100) as u8
}

#[async_trait]
impl TaskHandler for DanmuSendExecutor {
    fn name(&self) -> &'static str {
        "danmu_send"
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::DanmuSend
    }

    async fn handle(&self, task: &Task) -> SchedulerResult<ExecutionStatus> {
        let TaskPayload::DanmuSend {
            subject: planned,
            speech,
            task_index,
            total_tasks,
            dry_run,
            ..
        } = &task.payload
        else {
            return Err(unexpected_payload(self.name(), task));
        };
        let ctx = &self.ctx;

        let Some(subject) = ctx.rooms.find_subject(planned.id).await? else {
            ctx.log_failure(task, Some(planned), "直播间不存在，取消发送").await;
            return Ok(ExecutionStatus::Failed);
        };

        match ctx.send(&subject, speech, SendMode::from_dry_run(*dry_run)).await {
            SendOutcome::Sent => {
                ctx.log_success(
                    task,
                    Some(&subject),
                    &format!("第{}/{}条话术发送成功：{}", task_index, total_tasks, speech),
                )
                .await;
                ctx.progress.append(
                    ProgressLogEntry::success(format!(
                        "已发送第{}/{}条话术",
                        task_index, total_tasks
                    ))
                    .with_percent(danmu_percent(*task_index, *total_tasks))
                    .with_step("发送话术")
                    .with_subject(&subject),
                );

                // 先写入本任务的终态，完成统计才能把它算进去
                ctx.task_repo
                    .update_execution_status(&task.task_id, ExecutionStatus::Completed)
                    .await?;
                let progress = ctx.task_repo.danmu_progress(subject.id).await?;
                if progress.is_finished() {
                    info!(
                        "直播间 {} 话术发送完毕: 成功 {}/{}",
                        subject, progress.completed, progress.total
                    );
                    ctx.progress.finish(100, "话术发送完成", progress.completed as usize);
                    ctx.notify(
                        "✅ 话术发送完成",
                        &format!(
                            "直播间 {} 共发送 {} 条话术，成功 {} 条",
                            subject.name, progress.total, progress.completed
                        ),
                    )
                    .await;
                }
                Ok(ExecutionStatus::Completed)
            }
            SendOutcome::Failed(reason) => {
                warn!("直播间 {} 话术发送失败: {}", subject, reason);
                ctx.log_failure(
                    task,
                    Some(&subject),
                    &format!("第{}/{}条话术发送失败：{}", task_index, total_tasks, reason),
                )
                .await;
                ctx.progress.append(
                    ProgressLogEntry::error(format!("第{}条话术发送失败", task_index))
                        .with_subject(&subject),
                );
                ctx.retry.schedule_danmu_retry(task).await?;
                Ok(ExecutionStatus::Failed)
            }
        }
    }
}
