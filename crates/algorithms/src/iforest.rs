use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use botscan_core::stats::{mean, percentile, std_dev};
use botscan_core::{BotscanError, ClusterStat, Result};
use extended_isolation_forest::{Forest, ForestOptions};
use ndarray::Array2;
use serde_json::json;
use tracing::{info, warn};

use crate::dbscan::round2;
use crate::metrics;
use crate::strategy::{validate_matrix, AlgorithmStrategy, FitReport};

/// 隔离森林支持的最大特征维度
const MAX_DIMENSIONS: usize = 16;

/// 已训练森林的打分接口，擦除维度常量参数
trait ScoreModel: Send {
    fn score_row(&self, row: &[f64]) -> f64;
}

struct ForestModel<const N: usize> {
    forest: Forest<f64, N>,
}

impl<const N: usize> ScoreModel for ForestModel<N> {
    fn score_row(&self, row: &[f64]) -> f64 {
        let mut sample = [0.0f64; N];
        sample.copy_from_slice(row);
        self.forest.score(&sample)
    }
}

fn build_forest<const N: usize>(
    x: &Array2<f64>,
    options: &ForestOptions,
) -> Result<Box<dyn ScoreModel>> {
    let data: Vec<[f64; N]> = x
        .rows()
        .into_iter()
        .map(|row| {
            let mut sample = [0.0f64; N];
            for (i, v) in row.iter().enumerate() {
                sample[i] = *v;
            }
            sample
        })
        .collect();
    let forest: Forest<f64, N> = Forest::from_slice(&data, options)
        .map_err(|e| BotscanError::Internal(format!("隔离森林训练失败: {e:?}")))?;
    Ok(Box::new(ForestModel { forest }))
}

/// 维度是编译期常量，按列数分发到对应实例
fn fit_forest(x: &Array2<f64>, options: &ForestOptions) -> Result<Box<dyn ScoreModel>> {
    match x.ncols() {
        1 => build_forest::<1>(x, options),
        2 => build_forest::<2>(x, options),
        3 => build_forest::<3>(x, options),
        4 => build_forest::<4>(x, options),
        5 => build_forest::<5>(x, options),
        6 => build_forest::<6>(x, options),
        7 => build_forest::<7>(x, options),
        8 => build_forest::<8>(x, options),
        9 => build_forest::<9>(x, options),
        10 => build_forest::<10>(x, options),
        11 => build_forest::<11>(x, options),
        12 => build_forest::<12>(x, options),
        13 => build_forest::<13>(x, options),
        14 => build_forest::<14>(x, options),
        15 => build_forest::<15>(x, options),
        16 => build_forest::<16>(x, options),
        n => Err(BotscanError::InvalidInput(format!(
            "特征维度 {n} 超过隔离森林支持上限 {MAX_DIMENSIONS}"
        ))),
    }
}

struct FittedForest {
    scorer: Box<dyn ScoreModel>,
    threshold: f64,
    n_features: usize,
}

/// 隔离森林异常检测策略
///
/// 标签1为异常(机器人)，0为正常，没有噪声点。
pub struct IsolationForestStrategy {
    params: HashMap<String, serde_json::Value>,
    model: Option<FittedForest>,
}

impl IsolationForestStrategy {
    pub fn new() -> Self {
        let mut params = HashMap::new();
        params.insert("n_estimators".to_string(), json!("auto"));
        params.insert("contamination".to_string(), json!("auto"));
        params.insert("max_samples".to_string(), json!("auto"));
        params.insert("random_state".to_string(), json!(42));
        Self {
            params,
            model: None,
        }
    }

    /// 污染率: 显式值原样生效，自动估计按数据规模衰减并截断到[0.10, 0.25]
    fn resolve_contamination(&self, n_samples: usize) -> f64 {
        match self.params.get("contamination").and_then(|v| v.as_f64()) {
            Some(v) => v,
            None => {
                let factor = if n_samples <= 1000 {
                    0.9
                } else if n_samples <= 10_000 {
                    0.85
                } else {
                    0.8
                };
                (0.20_f64 * factor).clamp(0.10, 0.25)
            }
        }
    }

    fn resolve_n_estimators(&self, n_samples: usize) -> usize {
        if let Some(v) = self.params.get("n_estimators").and_then(|v| v.as_u64()) {
            return (v as usize).max(1);
        }
        if n_samples < 1000 {
            300
        } else if n_samples < 10_000 {
            400
        } else {
            600
        }
    }

    fn resolve_max_samples(&self, n_samples: usize) -> usize {
        if let Some(v) = self.params.get("max_samples").and_then(|v| v.as_u64()) {
            return (v as usize).clamp(1, n_samples);
        }
        256.min(n_samples)
    }
}

impl Default for IsolationForestStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmStrategy for IsolationForestStrategy {
    fn name(&self) -> &str {
        "IsolationForest"
    }

    fn params(&self) -> &HashMap<String, serde_json::Value> {
        &self.params
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn configure(&mut self, params: &HashMap<String, serde_json::Value>) -> bool {
        let mut ok = true;
        for (key, value) in params {
            match key.as_str() {
                "contamination" => {
                    let valid = value.as_f64().map(|v| v > 0.0 && v < 0.5).unwrap_or(false)
                        || value.as_str() == Some("auto");
                    if valid {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的contamination参数: {value}");
                        ok = false;
                    }
                }
                "n_estimators" | "max_samples" => {
                    let valid = value.as_u64().map(|v| v >= 1).unwrap_or(false)
                        || value.as_str() == Some("auto");
                    if valid {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的{key}参数: {value}");
                        ok = false;
                    }
                }
                "random_state" => {
                    if value.as_u64().is_some() {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的random_state参数: {value}");
                        ok = false;
                    }
                }
                other => {
                    warn!("IsolationForest忽略未知参数: {other}");
                }
            }
        }
        ok
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<FitReport> {
        validate_matrix(x)?;
        let start = Instant::now();

        let n = x.nrows();
        let contamination = self.resolve_contamination(n);
        let n_estimators = self.resolve_n_estimators(n);
        let max_samples = self.resolve_max_samples(n);
        let extension_level = if x.ncols() >= 2 { 1 } else { 0 };
        info!(
            "隔离森林训练开始: trees={n_estimators} contamination={contamination:.3} 样本数={n}"
        );

        let options = ForestOptions {
            n_trees: n_estimators,
            sample_size: max_samples,
            max_tree_depth: None,
            extension_level,
        };
        let scorer = fit_forest(x, &options)?;

        let scores: Vec<f64> = x
            .rows()
            .into_iter()
            .map(|row| {
                let values: Vec<f64> = row.iter().copied().collect();
                scorer.score_row(&values)
            })
            .collect();
        let threshold = percentile(&scores, (1.0 - contamination) * 100.0);
        let labels: Vec<i64> = scores
            .iter()
            .map(|s| if *s >= threshold { 1 } else { 0 })
            .collect();

        let bot_count = labels.iter().filter(|l| **l == 1).count();
        let normal_count = n - bot_count;
        let silhouette = metrics::silhouette_score(x, &labels);

        let mut cluster_stats = BTreeMap::new();
        cluster_stats.insert(
            "正常用户".to_string(),
            ClusterStat {
                size: normal_count,
                percentage: round2(normal_count as f64 / n as f64 * 100.0),
                center: None,
            },
        );
        cluster_stats.insert(
            "异常用户(机器人)".to_string(),
            ClusterStat {
                size: bot_count,
                percentage: round2(bot_count as f64 / n as f64 * 100.0),
                center: None,
            },
        );

        let mut parameters_used = HashMap::new();
        parameters_used.insert("n_estimators".to_string(), json!(n_estimators));
        parameters_used.insert("contamination".to_string(), json!(contamination));
        parameters_used.insert("max_samples".to_string(), json!(max_samples));
        parameters_used.insert(
            "random_state".to_string(),
            self.params["random_state"].clone(),
        );

        let mut extra_metrics = HashMap::new();
        extra_metrics.insert("anomaly_score_mean".to_string(), json!(mean(&scores)));
        extra_metrics.insert("anomaly_score_std".to_string(), json!(std_dev(&scores)));
        extra_metrics.insert(
            "anomaly_score_min".to_string(),
            json!(scores.iter().cloned().fold(f64::INFINITY, f64::min)),
        );
        extra_metrics.insert(
            "anomaly_score_max".to_string(),
            json!(scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
        );
        extra_metrics.insert("score_threshold".to_string(), json!(threshold));

        self.model = Some(FittedForest {
            scorer,
            threshold,
            n_features: x.ncols(),
        });
        let training_time = start.elapsed().as_secs_f64();
        info!(
            "隔离森林训练完成: {bot_count}个异常地址, 阈值{:.4}, 耗时{:.3}s",
            threshold, training_time
        );

        Ok(FitReport {
            labels,
            clusters_count: 2,
            bot_count,
            normal_count,
            noise_count: 0,
            silhouette_score: silhouette,
            cluster_stats,
            extra_metrics,
            parameters_used,
            training_time,
        })
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<i64>> {
        let model = self.model.as_ref().ok_or(BotscanError::NotFitted)?;
        if x.ncols() != model.n_features {
            return Err(BotscanError::InvalidInput(format!(
                "特征维度不匹配: 期望 {} 实际 {}",
                model.n_features,
                x.ncols()
            )));
        }
        validate_matrix(x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let values: Vec<f64> = row.iter().copied().collect();
                if model.scorer.score_row(&values) >= model.threshold {
                    1
                } else {
                    0
                }
            })
            .collect())
    }

    fn evaluate(&self, x: &Array2<f64>, labels: &[i64]) -> Result<HashMap<String, f64>> {
        if x.nrows() != labels.len() {
            return Err(BotscanError::InvalidInput(
                "标签数量与样本数量不一致".to_string(),
            ));
        }
        let anomaly = labels.iter().filter(|l| **l == 1).count();
        let mut map = HashMap::new();
        map.insert(
            "silhouette_score".to_string(),
            metrics::silhouette_score(x, labels),
        );
        map.insert(
            "anomaly_rate".to_string(),
            anomaly as f64 / labels.len().max(1) as f64,
        );
        map.insert("n_clusters".to_string(), 2.0);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_xoshiro::rand_core::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn cluster_with_outliers() -> Array2<f64> {
        let mut rng = Xoshiro256Plus::seed_from_u64(11);
        let mut rows = Vec::with_capacity(200 * 2);
        for _ in 0..190 {
            rows.push(rng.gen_range(-1.0..1.0));
            rows.push(rng.gen_range(-1.0..1.0));
        }
        for _ in 0..10 {
            rows.push(rng.gen_range(40.0..60.0));
            rows.push(rng.gen_range(40.0..60.0));
        }
        Array2::from_shape_vec((200, 2), rows).unwrap()
    }

    #[test]
    fn test_auto_contamination_tiers_and_clamp() {
        let strategy = IsolationForestStrategy::new();
        assert!((strategy.resolve_contamination(500) - 0.18).abs() < 1e-12);
        assert!((strategy.resolve_contamination(5000) - 0.17).abs() < 1e-12);
        assert!((strategy.resolve_contamination(50_000) - 0.16).abs() < 1e-12);
        for n in [10, 999, 1001, 9999, 10_001, 1_000_000] {
            let c = strategy.resolve_contamination(n);
            assert!((0.10..=0.25).contains(&c), "污染率越界: {c}");
        }
    }

    #[test]
    fn test_explicit_contamination_honored_unclamped() {
        let mut strategy = IsolationForestStrategy::new();
        let mut params = HashMap::new();
        params.insert("contamination".to_string(), json!(0.45));
        assert!(strategy.configure(&params));
        // 显式值不被自动估计的截断区间改写
        assert!((strategy.resolve_contamination(100) - 0.45).abs() < 1e-12);
        assert!((strategy.resolve_contamination(1_000_000) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_auto_n_estimators_tiers() {
        let strategy = IsolationForestStrategy::new();
        assert_eq!(strategy.resolve_n_estimators(500), 300);
        assert_eq!(strategy.resolve_n_estimators(5000), 400);
        assert_eq!(strategy.resolve_n_estimators(50_000), 600);
    }

    #[test]
    fn test_fit_flags_outliers() {
        let x = cluster_with_outliers();
        let mut strategy = IsolationForestStrategy::new();
        let report = strategy.fit(&x).unwrap();

        assert!(strategy.is_fitted());
        assert_eq!(report.noise_count, 0);
        assert_eq!(report.clusters_count, 2);
        assert_eq!(report.bot_count + report.normal_count, 200);
        // 污染率0.18下应标出至少10个异常
        assert!(report.bot_count >= 10);
        // 明显的离群点应全部落在异常侧
        let outliers_flagged = report.labels[190..].iter().filter(|l| **l == 1).count();
        assert!(outliers_flagged >= 8, "离群点漏检: {outliers_flagged}/10");
    }

    #[test]
    fn test_predict_uses_stored_threshold() {
        let x = cluster_with_outliers();
        let mut strategy = IsolationForestStrategy::new();
        strategy.fit(&x).unwrap();

        let probe = Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 50.0, 50.0]).unwrap();
        let labels = strategy.predict(&probe).unwrap();
        assert_eq!(labels[0], 0);
        assert_eq!(labels[1], 1);
    }

    #[test]
    fn test_dimension_cap() {
        let x = Array2::zeros((10, 17));
        let mut strategy = IsolationForestStrategy::new();
        let err = strategy.fit(&x).unwrap_err();
        assert!(matches!(err, BotscanError::InvalidInput(_)));
        assert!(!strategy.is_fitted());
    }

    #[test]
    fn test_nan_rejected() {
        let mut x = cluster_with_outliers();
        x[[5, 1]] = f64::NAN;
        let mut strategy = IsolationForestStrategy::new();
        assert!(matches!(
            strategy.fit(&x).unwrap_err(),
            BotscanError::InvalidInput(_)
        ));
        assert!(!strategy.is_fitted());
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let x = cluster_with_outliers();
        let mut strategy = IsolationForestStrategy::new();
        strategy.fit(&x).unwrap();
        let bad = Array2::zeros((1, 3));
        assert!(matches!(
            strategy.predict(&bad).unwrap_err(),
            BotscanError::InvalidInput(_)
        ));
    }
}
