//! # 任务执行
//!
//! 定时器触发后的执行路径：幂等守卫、按负载类型分发、四种执行器，
//! 以及通过外部命令实现的界面自动化桥接。

pub mod automation_bridge;
pub mod context;
pub mod execution;
pub mod executors;

pub use automation_bridge::{CommandAutomation, TracingNotifier};
pub use context::HandlerContext;
pub use execution::ExecutionDispatcher;
pub use executors::{
    DanmuSendExecutor, FollowBatchExecutor, ImageRecognitionExecutor, LiveReminderExecutor,
};
