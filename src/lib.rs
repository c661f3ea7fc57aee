//! # livefollow
//!
//! 直播间跟播任务调度：开播提醒、批量跟播、图像识别与弹幕发送，
//! 任务持久化在 SQLite 中，进程重启后自动恢复。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
