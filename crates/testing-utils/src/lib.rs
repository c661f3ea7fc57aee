//! # 测试工具
//!
//! 各 crate 共享的测试替身和数据构建器：
//!
//! - **内存仓储**：`MockTaskRepository`、`MockTaskLogRepository`
//! - **协作方替身**：`MockAutomation`、`MockRoomDirectory`、`RecordingNotifier`
//! - **调度器替身**：`RecordingScheduler`，只记录挂载的任务
//! - **构建器**：`TaskBuilder`
//!
//! 作为 dev-dependency 引入：
//!
//! ```toml
//! [dev-dependencies]
//! livefollow-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
