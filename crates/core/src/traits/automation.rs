//! 外部协作方接口
//!
//! 界面自动化、桌面通知和业务数据查询都由核心之外的组件提供，
//! 核心只通过这里的窄接口调用它们。

use async_trait::async_trait;

use crate::{
    models::{LiveTimeSlot, Subject},
    SchedulerResult,
};

/// 发送模式，测试跟播只演练流程不真正提交
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Commit,
    DryRun,
}

impl SendMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            SendMode::DryRun
        } else {
            SendMode::Commit
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Ready,
    NotLive,
    AutomationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(String),
    NoMatch,
    /// 识别能力本身出错，与未识别到区分开
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed(String),
}

/// 界面自动化能力，所有调用共享同一个自动化会话
#[async_trait]
pub trait AutomationCapability: Send + Sync {
    /// 进入直播间并准备好发送消息
    async fn enter_and_prepare_subject(&self, subject: &Subject, mode: SendMode)
        -> PrepareOutcome;

    /// 在当前画面中查找直播间绑定的商品图片
    async fn match_bound_image(&self, subject: &Subject) -> MatchOutcome;

    async fn send_message(&self, subject: &Subject, text: &str, mode: SendMode) -> SendOutcome;
}

/// 桌面通知，失败不影响任务结果
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, title: &str, message: &str);
}

/// 直播间业务数据的只读查询
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn find_subject(&self, subject_id: i64) -> SchedulerResult<Option<Subject>>;

    async fn get_room_speeches(&self, subject: &Subject) -> SchedulerResult<Vec<String>>;

    /// 按ID批量解析直播间，不存在的ID被忽略
    async fn get_room_subjects(&self, subject_ids: &[i64]) -> SchedulerResult<Vec<Subject>>;

    /// 将直播间最早一条待开播记录标记为已开播，没有待开播记录时返回 false
    async fn mark_live_started(&self, subject_id: i64) -> SchedulerResult<bool>;

    /// 待开播的直播时间表
    async fn pending_live_times(&self) -> SchedulerResult<Vec<LiveTimeSlot>>;
}
