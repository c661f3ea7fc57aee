//! # 数据模型
//!
//! 跟播任务引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Task - 任务记录
//! 任务存储中的一行，`task_id` 同时是幂等键和调度器的定时器句柄。
//! `status` 只描述调度层面的 `Pending → Consumed` 翻转，
//! 业务执行结果由 `execution_status` 表示。
//!
//! ### TaskPayload - 任务负载
//! 按任务类型区分的标签联合体，分发表根据其变体选择执行器。
//!
//! ### TaskLogEntry - 执行日志
//! 只追加的审计记录，每个终态结果写入一条。
//!
//! ## 状态流转
//!
//! ```text
//! status:           Pending ──(幂等守卫 / 取消)──▶ Consumed
//! execution_status: pending ─▶ executing ─▶ completed | failed | partial | error
//! ```
//!
//! ## 数据库映射
//!
//! ### tasks 表
//! - `task_id` - 主键
//! - `task_type` - 任务类型
//! - `subject_ids` - 关联直播间，形如 `,1,2,`
//! - `payload` - JSON 负载
//! - `run_time` - 触发时间
//! - `status` - 0 等待触发 / 1 已消费
//! - `execution_status` - 执行状态
//!
//! ### task_logs 表
//! - `id` - 自增主键
//! - `task_id` - 关联任务ID
//! - `status` - 1 成功 / 2 失败

pub mod stats;
pub mod task;
pub mod task_id;
pub mod task_log;

pub use stats::*;
pub use task::*;
pub use task_log::*;
