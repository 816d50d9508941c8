//! 检测算法集合
//!
//! 策略接口、注册表和三个内置算法实现:
//! DBSCAN、IsolationForest、KmeansPlus，均支持参数自动调优。

pub mod dbscan;
pub mod iforest;
pub mod kmeans;
pub mod metrics;
pub mod registry;
pub mod strategy;

pub use dbscan::DbscanStrategy;
pub use iforest::IsolationForestStrategy;
pub use kmeans::KmeansPlusStrategy;
pub use registry::{AlgorithmDescriptor, AlgorithmRegistry};
pub use strategy::{AlgorithmStrategy, FitReport};
