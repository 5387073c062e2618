//! 核心层：错误类型、取消 / 关闭、工具并发调度

pub mod error;
pub mod shutdown;
pub mod task_scheduler;

pub use error::AgentError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use task_scheduler::TaskScheduler;
