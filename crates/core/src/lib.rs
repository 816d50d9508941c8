//! 分析引擎核心类型
//!
//! 包含错误定义、任务与结果模型、配置加载和统计工具函数。

pub mod config;
pub mod errors;
pub mod models;
pub mod stats;

pub use config::{AppConfig, EngineConfig, FeatureConfig, ObservabilityConfig};
pub use errors::{BotscanError, Result};
pub use models::{
    AlgorithmResult, ClusterStat, Job, JobSpec, JobStatus, JobView, SchedulerStats,
};
