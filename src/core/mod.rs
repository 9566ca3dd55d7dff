//! 核心层：错误分类、调用调度、使用统计、对话引擎

pub mod engine;
pub mod error;
pub mod stats;
pub mod task_scheduler;

pub use engine::{ChatEngine, EngineSettings};
pub use error::ChatError;
pub use stats::{StatsRecorder, StatsSnapshot};
pub use task_scheduler::CallScheduler;
