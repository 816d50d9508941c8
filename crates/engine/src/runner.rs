use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use botscan_algorithms::{metrics, AlgorithmRegistry};
use botscan_core::{AlgorithmResult, BotscanError, FeatureConfig, Result};
use botscan_features::{detect_format, DataTable, FeatureExtractor, Scaler, ScalerKind};
use tracing::{info, warn};

/// 固定的进度检查点，顺序上报
pub const CHECKPOINTS: [(u8, &str); 6] = [
    (10, "数据加载中"),
    (30, "特征提取中"),
    (50, "算法初始化"),
    (70, "算法训练中"),
    (90, "结果处理中"),
    (100, "分析完成"),
];

/// 单任务执行器
///
/// 同步阻塞执行，由调度器放入spawn_blocking。
/// 每个检查点之前检查取消标志。
pub struct JobRunner {
    registry: Arc<AlgorithmRegistry>,
    features: FeatureConfig,
}

impl JobRunner {
    pub fn new(registry: Arc<AlgorithmRegistry>, features: FeatureConfig) -> Self {
        Self { registry, features }
    }

    /// 执行完整分析流程
    ///
    /// 加载 -> 特征提取 -> 算法初始化 -> 训练 -> 结果处理。
    /// UnknownAlgorithm和InvalidInput原样透出，
    /// 训练中其他错误包装为Execution并携带所在阶段。
    pub fn run(
        &self,
        job_id: i64,
        algorithm_name: &str,
        dataset_path: &Path,
        parameters: &HashMap<String, serde_json::Value>,
        cancel: &AtomicBool,
        progress: &dyn Fn(u8, &str),
    ) -> Result<AlgorithmResult> {
        let started = Instant::now();
        info!("任务{job_id}开始执行: algorithm={algorithm_name}");

        check_cancel(job_id, cancel)?;
        progress(10, "数据加载中");
        let table = DataTable::from_csv_path(dataset_path)?;

        check_cancel(job_id, cancel)?;
        progress(30, "特征提取中");
        let format = detect_format(&table);
        let extractor = FeatureExtractor::new(self.features.use_optimized_features);
        let matrix = extractor.extract(&table, format)?;
        let mut scaler = Scaler::new(ScalerKind::from_str(&self.features.scaler)?);
        let scaled = scaler.normalize(&matrix.data)?;

        check_cancel(job_id, cancel)?;
        progress(50, "算法初始化");
        let mut strategy = self.registry.create(algorithm_name)?;
        if !strategy.configure(parameters) {
            return Err(BotscanError::InvalidInput(format!(
                "算法 {algorithm_name} 的参数不合法"
            )));
        }

        check_cancel(job_id, cancel)?;
        progress(70, "算法训练中");
        let report = strategy.fit(&scaled).map_err(|e| match e {
            BotscanError::InvalidInput(_)
            | BotscanError::UnknownAlgorithm { .. }
            | BotscanError::JobCancelled { .. } => e,
            other => BotscanError::Execution {
                algorithm: algorithm_name.to_string(),
                stage: "算法训练中".to_string(),
                message: other.to_string(),
            },
        })?;

        check_cancel(job_id, cancel)?;
        progress(90, "结果处理中");
        let total = matrix.n_samples();
        // 噪声点不参与最终轮廓系数
        let silhouette = round4(metrics::silhouette_score(&scaled, &report.labels));
        let result = AlgorithmResult {
            algorithm_name: algorithm_name.to_string(),
            clusters_count: report.clusters_count,
            total_addresses: total,
            bot_addresses_count: report.bot_count,
            bot_addresses_percentage: percentage(report.bot_count, total),
            normal_addresses_count: report.normal_count,
            normal_addresses_percentage: percentage(report.normal_count, total),
            noise_points: report.noise_count,
            noise_percentage: percentage(report.noise_count, total),
            silhouette_score: silhouette,
            cluster_stats: report.cluster_stats,
            extra_metrics: report.extra_metrics,
            parameters_used: report.parameters_used,
            feature_count: matrix.n_features(),
            data_format: format.as_str().to_string(),
            processing_time: round3(started.elapsed().as_secs_f64()),
            labels: report.labels,
        };

        check_cancel(job_id, cancel)?;
        progress(100, "分析完成");
        info!(
            "任务{job_id}执行完成: {}个簇, 机器人占比{:.2}%, 耗时{:.3}s",
            result.clusters_count, result.bot_addresses_percentage, result.processing_time
        );
        Ok(result)
    }
}

fn check_cancel(job_id: i64, cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        warn!("任务{job_id}在检查点发现取消标志");
        return Err(BotscanError::JobCancelled { id: job_id });
    }
    Ok(())
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(count as f64 / total as f64 * 100.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}
