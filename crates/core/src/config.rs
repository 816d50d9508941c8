use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 最大并发任务数
    pub max_concurrent_jobs: usize,
}

/// 特征管线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// 标准化方法: robust | standard
    pub scaler: String,
    /// 是否优先使用精选特征列表
    pub use_optimized_features: bool,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub features: FeatureConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                max_concurrent_jobs: 3,
            },
            features: FeatureConfig {
                scaler: "robust".to_string(),
                use_optimized_features: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置
    ///
    /// 加载顺序:
    /// 1. 默认配置
    /// 2. 配置文件 (TOML格式)
    /// 3. 环境变量覆盖 (前缀: BOTSCAN_)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("engine.max_concurrent_jobs", 3)?
            .set_default("features.scaler", "robust")?
            .set_default("features.use_optimized_features", true)?
            .set_default("observability.log_level", "info")?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/botscan.toml", "botscan.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        // 环境变量覆盖，优先级最高
        builder = builder.add_source(
            Environment::with_prefix("BOTSCAN")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_jobs < 1 {
            return Err(anyhow::anyhow!("max_concurrent_jobs 必须至少为1"));
        }
        match self.features.scaler.as_str() {
            "robust" | "standard" => {}
            other => {
                return Err(anyhow::anyhow!("不支持的标准化方法: {}", other));
            }
        }
        Ok(())
    }
}
