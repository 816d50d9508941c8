use botscan_core::{BotscanError, Result};
use tracing::info;

use crate::dbscan::DbscanStrategy;
use crate::iforest::IsolationForestStrategy;
use crate::kmeans::KmeansPlusStrategy;
use crate::strategy::AlgorithmStrategy;

/// 算法元信息
#[derive(Debug, Clone)]
pub struct AlgorithmDescriptor {
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
}

type Factory = Box<dyn Fn() -> Box<dyn AlgorithmStrategy> + Send + Sync>;

/// 算法注册表
///
/// 显式依赖注入对象，不使用全局状态。
/// list()按注册顺序返回，保证确定性。
pub struct AlgorithmRegistry {
    entries: Vec<(AlgorithmDescriptor, Factory)>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// 创建并注册全部内置算法
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<(AlgorithmDescriptor, Factory)> = vec![
            (
                AlgorithmDescriptor {
                    name: "DBSCAN".to_string(),
                    description: "基于密度的聚类算法，自动识别噪声点".to_string(),
                    author: "区块链".to_string(),
                    version: "2.0".to_string(),
                },
                Box::new(|| Box::new(DbscanStrategy::new()) as Box<dyn AlgorithmStrategy>),
            ),
            (
                AlgorithmDescriptor {
                    name: "IsolationForest".to_string(),
                    description: "隔离森林异常检测算法".to_string(),
                    author: "区块链".to_string(),
                    version: "2.0".to_string(),
                },
                Box::new(|| Box::new(IsolationForestStrategy::new()) as Box<dyn AlgorithmStrategy>),
            ),
            (
                AlgorithmDescriptor {
                    name: "KmeansPlus".to_string(),
                    description: "带K值自动选择的K-Means聚类算法".to_string(),
                    author: "区块链".to_string(),
                    version: "2.0".to_string(),
                },
                Box::new(|| Box::new(KmeansPlusStrategy::new()) as Box<dyn AlgorithmStrategy>),
            ),
        ];
        for (descriptor, factory) in builtins {
            // 内置名称互不相同，注册不会失败
            let _ = registry.register(descriptor, factory);
        }
        registry
    }

    /// 注册算法，名称冲突时报错
    pub fn register(&mut self, descriptor: AlgorithmDescriptor, factory: Factory) -> Result<()> {
        if self.contains(&descriptor.name) {
            return Err(BotscanError::DuplicateAlgorithm {
                name: descriptor.name,
            });
        }
        info!("注册算法: {} v{}", descriptor.name, descriptor.version);
        self.entries.push((descriptor, factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(d, _)| d.name == name)
    }

    /// 按注册顺序列出所有算法
    pub fn list(&self) -> Vec<&AlgorithmDescriptor> {
        self.entries.iter().map(|(d, _)| d).collect()
    }

    pub fn describe(&self, name: &str) -> Result<&AlgorithmDescriptor> {
        self.entries
            .iter()
            .map(|(d, _)| d)
            .find(|d| d.name == name)
            .ok_or_else(|| BotscanError::UnknownAlgorithm {
                name: name.to_string(),
            })
    }

    /// 创建新的策略实例
    pub fn create(&self, name: &str) -> Result<Box<dyn AlgorithmStrategy>> {
        self.entries
            .iter()
            .find(|(d, _)| d.name == name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| BotscanError::UnknownAlgorithm {
                name: name.to_string(),
            })
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
