//! # 调度与任务管理
//!
//! - [`TimerScheduler`]：每个待触发任务一个定时器，执行池限制并发
//! - [`IdempotencyGuard`]：原子消费，保证每个任务最多执行一次
//! - [`TaskRetryService`]：失败重试与识别、弹幕任务的链式派生
//! - [`TaskManager`]：面向界面和命令行的操作入口
//! - [`MaintenanceService`]：定期对账、清理和开播时间表同步

pub mod idempotency;
pub mod maintenance_service;
pub mod retry_service;
pub mod scheduler;
pub mod task_manager;

pub use idempotency::IdempotencyGuard;
pub use maintenance_service::MaintenanceService;
pub use retry_service::{summarize_rooms, RetryService, TaskRetryService};
pub use scheduler::{ReconcileReport, RecoveryReport, TimerScheduler};
pub use task_manager::{RunAt, TaskManager};
