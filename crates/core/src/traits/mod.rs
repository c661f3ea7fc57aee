pub mod automation;
pub mod repository;
pub mod scheduler;
pub mod task_handler;

pub use automation::*;
pub use repository::*;
pub use scheduler::*;
pub use task_handler::*;
