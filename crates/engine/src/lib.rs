//! 任务执行引擎
//!
//! JobRunner负责单个任务的完整分析流程，
//! JobScheduler提供有界并发的异步调度和取消。

pub mod runner;
pub mod scheduler;

pub use runner::JobRunner;
pub use scheduler::{CompletionHook, JobScheduler, ProgressSink};
