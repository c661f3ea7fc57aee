use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use livefollow_core::{
    models::{ExecutionStatus, PayloadKind, Subject, Task, TaskPayload},
    progress::ProgressLogEntry,
    traits::{SendMode, TaskHandler},
    SchedulerResult,
};
use livefollow_dispatcher::summarize_rooms;

use super::unexpected_payload;
use crate::context::HandlerContext;

/// 跟播批次，直播间按顺序依次进入
///
/// 测试跟播走同样的流程，只是以演练模式调用自动化，不真正发送消息，
/// 失败后也不生成重试任务。
pub struct FollowBatchExecutor {
    ctx: Arc<HandlerContext>,
}

impl FollowBatchExecutor {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

/// 第 `index` 个直播间开始时的进度
fn subject_percent(index: usize, total: usize) -> u8 {
    (20 + index * 70 / total.max(1)) as u8
}

#[async_trait]
impl TaskHandler for FollowBatchExecutor {
    fn name(&self) -> &'static str {
        "follow_batch"
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::FollowBatch
    }

    async fn handle(&self, task: &Task) -> SchedulerResult<ExecutionStatus> {
        let TaskPayload::FollowBatch { subjects, dry_run } = &task.payload else {
            return Err(unexpected_payload(self.name(), task));
        };
        let ctx = &self.ctx;
        let dry_run = *dry_run;
        let mode = SendMode::from_dry_run(dry_run);
        let label = if dry_run { "测试跟播" } else { "跟播" };
        let total = subjects.len();

        ctx.progress.begin_batch(total, label);
        ctx.progress.append(
            ProgressLogEntry::info(format!("开始{}，共 {} 个直播间", label, total))
                .with_percent(10)
                .with_step("开始"),
        );
        ctx.notify(
            &format!("开始{label}"),
            &format!("即将进入 {}", summarize_rooms(subjects)),
        )
        .await;

        let mut succeeded: Vec<Subject> = Vec::new();
        let mut failed_rooms: Vec<Subject> = Vec::new();
        let mut retryable: Vec<Subject> = Vec::new();

        for (index, planned) in subjects.iter().enumerate() {
            ctx.progress.set_current_subject(Some(planned));
            ctx.progress.append(
                ProgressLogEntry::info(format!("正在进入直播间 {}", planned.name))
                    .with_percent(subject_percent(index, total))
                    .with_step("进入直播间")
                    .with_subject(planned),
            );

            let Some(subject) = ctx.rooms.find_subject(planned.id).await? else {
                warn!("直播间不存在，跳过: {}", planned);
                ctx.log_failure(task, Some(planned), "直播间不存在，已跳过").await;
                ctx.progress.append(
                    ProgressLogEntry::error(format!("直播间 {} 不存在", planned.name))
                        .with_subject(planned),
                );
                failed_rooms.push(planned.clone());
                continue;
            };

            let error = match ctx.enter(&subject, mode).await {
                Ok(()) => {
                    info!("{}成功: {}", label, subject);
                    ctx.log_success(task, Some(&subject), &format!("{label}：进入直播间成功"))
                        .await;
                    ctx.progress.advance_completed();
                    ctx.progress.append(
                        ProgressLogEntry::success(format!("已进入直播间 {}", subject.name))
                            .with_subject(&subject),
                    );
                    if let Err(e) = ctx.retry.chain_recognition(&subject, dry_run).await {
                        warn!("直播间 {} 创建图像识别任务失败: {}", subject, e);
                    }
                    succeeded.push(subject);
                    continue;
                }
                Err(e) => e,
            };

            warn!("{}失败: {} - {}", label, subject, error);
            ctx.log_failure(task, Some(&subject), &format!("{label}失败：{error}"))
                .await;
            ctx.progress.append(
                ProgressLogEntry::error(format!("{}：{}", subject.name, error))
                    .with_subject(&subject),
            );
            failed_rooms.push(subject.clone());
            if error.is_transient() {
                retryable.push(subject);
            }
        }
        ctx.progress.set_current_subject(None);

        let status = ExecutionStatus::from_batch(succeeded.len(), total);
        let done = succeeded.len();
        match status {
            ExecutionStatus::Completed => {
                if total == 1 {
                    ctx.progress.finish(65, "图像识别监控中", done);
                } else {
                    ctx.progress.finish(100, &format!("{label}完成"), done);
                }
                ctx.notify(
                    &format!("{label}完成"),
                    &format!("{} 个直播间全部进入成功", done),
                )
                .await;
            }
            ExecutionStatus::Partial => {
                ctx.progress.finish(95, "部分完成", done);
                ctx.notify(
                    &format!("{label}部分完成"),
                    &format!(
                        "成功 {} 个，失败 {} 个：{}",
                        done,
                        failed_rooms.len(),
                        summarize_rooms(&failed_rooms)
                    ),
                )
                .await;
            }
            _ => {
                ctx.progress.finish(0, &format!("{label}失败"), 0);
                ctx.notify(
                    &format!("{label}失败"),
                    &format!("失败直播间：{}", summarize_rooms(&failed_rooms)),
                )
                .await;
                if !dry_run {
                    ctx.retry
                        .schedule_follow_retry(task, &retryable, &failed_rooms, None)
                        .await?;
                }
            }
        }

        info!(
            "{}结束: {} 成功 {}/{}",
            label,
            task.task_id,
            done,
            total
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::subject_percent;

    #[test]
    fn test_subject_percent() {
        assert_eq!(subject_percent(0, 1), 20);
        assert_eq!(subject_percent(0, 3), 20);
        assert_eq!(subject_percent(1, 3), 43);
        assert_eq!(subject_percent(2, 3), 66);
    }
}
