use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use botscan_core::stats::{mean, median, percentile, std_dev};
use botscan_core::{BotscanError, ClusterStat, Result};
use linfa::traits::Transformer;
use linfa_clustering::Dbscan;
use ndarray::Array2;
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::strategy::{label_statistics, validate_matrix, AlgorithmStrategy, FitReport};

/// k距离曲线采样上限
const KDIST_SAMPLE_CAP: usize = 5000;

/// DBSCAN密度聚类策略
///
/// eps和min_samples默认"auto"，在fit时按数据规模自动估计。
pub struct DbscanStrategy {
    params: HashMap<String, serde_json::Value>,
    labels: Option<Vec<i64>>,
}

impl DbscanStrategy {
    pub fn new() -> Self {
        let mut params = HashMap::new();
        params.insert("eps".to_string(), json!("auto"));
        params.insert("min_samples".to_string(), json!("auto"));
        params.insert("metric".to_string(), json!("euclidean"));
        params.insert("random_state".to_string(), json!(42));
        Self {
            params,
            labels: None,
        }
    }

    fn random_state(&self) -> u64 {
        self.params
            .get("random_state")
            .and_then(|v| v.as_u64())
            .unwrap_or(42)
    }

    fn resolve_min_samples(&self, n_samples: usize, n_features: usize) -> usize {
        if let Some(v) = self.params.get("min_samples").and_then(|v| v.as_u64()) {
            return (v as usize).max(1);
        }
        let log_n = (n_samples.max(2) as f64).log2() as usize;
        4.max((2 * n_features).min(log_n))
    }

    fn resolve_eps(&self, x: &Array2<f64>, min_samples: usize) -> f64 {
        if let Some(v) = self.params.get("eps").and_then(|v| v.as_f64()) {
            return v;
        }
        self.auto_eps(x, min_samples)
    }

    /// 基于k距离曲线估计eps
    ///
    /// 三个估计量取中位数: 二阶差分拐点、80分位数、均值+0.4倍标准差，
    /// 再按数据规模放大并截断到经验区间。
    fn auto_eps(&self, x: &Array2<f64>, min_samples: usize) -> f64 {
        let n = x.nrows();
        let indices: Vec<usize> = if n > KDIST_SAMPLE_CAP {
            let mut rng = Xoshiro256Plus::seed_from_u64(self.random_state());
            rand::seq::index::sample(&mut rng, n, KDIST_SAMPLE_CAP).into_vec()
        } else {
            (0..n).collect()
        };

        let kdist = kth_neighbor_distances(x, &indices, min_samples);
        let base = if kdist.len() < 10 {
            median(&kdist)
        } else {
            let elbow = elbow_estimate(&kdist);
            let p80 = percentile(&kdist, 80.0);
            let spread = mean(&kdist) + 0.4 * std_dev(&kdist);
            median(&[elbow, p80, spread])
        };

        let (factor, lo, hi) = if n <= 1000 {
            (1.6, 0.2, 2.8)
        } else if n <= 10_000 {
            (1.4, 0.15, 2.3)
        } else {
            (1.8, 0.03, 1.5)
        };
        let eps = (base * factor).clamp(lo, hi);
        debug!(
            "eps自动估计: base={:.4} factor={} -> {:.4} (样本数={})",
            base, factor, eps, n
        );
        eps
    }
}

/// 每个采样点到第k近邻的距离
fn kth_neighbor_distances(x: &Array2<f64>, indices: &[usize], k: usize) -> Vec<f64> {
    let m = indices.len();
    if m < 2 {
        return Vec::new();
    }
    let k_eff = k.min(m - 1).max(1);
    let mut kdist = Vec::with_capacity(m);
    for &i in indices {
        let mut dists: Vec<f64> = indices
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| {
                x.row(i)
                    .iter()
                    .zip(x.row(j).iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();
        dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        kdist.push(dists[k_eff - 1]);
    }
    kdist
}

/// 降序k距离曲线平滑后的二阶差分拐点
fn elbow_estimate(kdist: &[f64]) -> f64 {
    let mut curve: Vec<f64> = kdist.to_vec();
    curve.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    // 移动平均平滑，窗口为奇数且不超过51
    let window = (curve.len() / 4 * 2 + 1).min(51).max(1);
    let half = window / 2;
    let smoothed: Vec<f64> = (0..curve.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(curve.len());
            mean(&curve[lo..hi])
        })
        .collect();

    let mut best_idx = smoothed.len() / 2;
    let mut best_score = f64::NEG_INFINITY;
    for i in 1..smoothed.len().saturating_sub(1) {
        let second_diff = (smoothed[i - 1] - 2.0 * smoothed[i] + smoothed[i + 1]).abs();
        if second_diff > best_score {
            best_score = second_diff;
            best_idx = i;
        }
    }
    smoothed[best_idx]
}

impl Default for DbscanStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmStrategy for DbscanStrategy {
    fn name(&self) -> &str {
        "DBSCAN"
    }

    fn params(&self) -> &HashMap<String, serde_json::Value> {
        &self.params
    }

    fn is_fitted(&self) -> bool {
        self.labels.is_some()
    }

    fn configure(&mut self, params: &HashMap<String, serde_json::Value>) -> bool {
        let mut ok = true;
        for (key, value) in params {
            match key.as_str() {
                "eps" => {
                    let valid = value.as_f64().map(|v| v > 0.0).unwrap_or(false)
                        || value.as_str() == Some("auto");
                    if valid {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的eps参数: {value}");
                        ok = false;
                    }
                }
                "min_samples" => {
                    let valid = value.as_u64().map(|v| v >= 1).unwrap_or(false)
                        || value.as_str() == Some("auto");
                    if valid {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的min_samples参数: {value}");
                        ok = false;
                    }
                }
                "metric" => {
                    if value.as_str() == Some("euclidean") {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("不支持的距离度量: {value}");
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
                    warn!("DBSCAN忽略未知参数: {other}");
                }
            }
        }
        ok
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<FitReport> {
        validate_matrix(x)?;
        let start = Instant::now();

        let n = x.nrows();
        let min_samples = self.resolve_min_samples(n, x.ncols());
        let eps = self.resolve_eps(x, min_samples);
        info!("DBSCAN训练开始: eps={:.4} min_samples={min_samples} 样本数={n}", eps);

        let assignments = Dbscan::params(min_samples)
            .tolerance(eps)
            .transform(x)
            .map_err(|e| BotscanError::Internal(format!("DBSCAN聚类失败: {e}")))?;
        let labels: Vec<i64> = assignments
            .iter()
            .map(|c| c.map(|v| v as i64).unwrap_or(-1))
            .collect();

        let stats = label_statistics(&labels);
        let silhouette = metrics::silhouette_score(x, &labels);
        let cluster_stats = cluster_stats_with_centers(x, &labels);

        let mut parameters_used = HashMap::new();
        parameters_used.insert("eps".to_string(), json!(eps));
        parameters_used.insert("min_samples".to_string(), json!(min_samples));
        parameters_used.insert("metric".to_string(), json!("euclidean"));

        let mut extra_metrics = HashMap::new();
        extra_metrics.insert(
            "noise_ratio".to_string(),
            json!(stats.noise_count as f64 / n as f64),
        );

        self.labels = Some(labels.clone());
        let training_time = start.elapsed().as_secs_f64();
        info!(
            "DBSCAN训练完成: {}个簇, {}个噪声点, 耗时{:.3}s",
            stats.clusters_count, stats.noise_count, training_time
        );

        Ok(FitReport {
            labels,
            clusters_count: stats.clusters_count,
            bot_count: stats.bot_count,
            normal_count: stats.normal_count,
            noise_count: stats.noise_count,
            silhouette_score: silhouette,
            cluster_stats,
            extra_metrics,
            parameters_used,
            training_time,
        })
    }

    /// 密度模型没有样本外预测，返回训练标签
    fn predict(&self, _x: &Array2<f64>) -> Result<Vec<i64>> {
        self.labels.clone().ok_or(BotscanError::NotFitted)
    }

    fn evaluate(&self, x: &Array2<f64>, labels: &[i64]) -> Result<HashMap<String, f64>> {
        if x.nrows() != labels.len() {
            return Err(BotscanError::InvalidInput(
                "标签数量与样本数量不一致".to_string(),
            ));
        }
        let stats = label_statistics(labels);
        let mut map = HashMap::new();
        map.insert(
            "silhouette_score".to_string(),
            metrics::silhouette_score(x, labels),
        );
        map.insert("n_clusters".to_string(), stats.clusters_count as f64);
        map.insert(
            "noise_ratio".to_string(),
            stats.noise_count as f64 / labels.len().max(1) as f64,
        );
        Ok(map)
    }
}

/// 按簇汇总规模、占比和质心，噪声点单列
pub(crate) fn cluster_stats_with_centers(
    x: &Array2<f64>,
    labels: &[i64],
) -> BTreeMap<String, ClusterStat> {
    let total = labels.len().max(1);
    let mut members: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, label) in labels.iter().enumerate() {
        members.entry(*label).or_default().push(i);
    }

    let mut stats = BTreeMap::new();
    for (label, indices) in members {
        let size = indices.len();
        let percentage = round2(size as f64 / total as f64 * 100.0);
        if label == -1 {
            stats.insert(
                "噪声点".to_string(),
                ClusterStat {
                    size,
                    percentage,
                    center: None,
                },
            );
        } else {
            let mut center = vec![0.0; x.ncols()];
            for &i in &indices {
                for (j, v) in x.row(i).iter().enumerate() {
                    center[j] += v;
                }
            }
            for v in center.iter_mut() {
                *v /= size as f64;
            }
            stats.insert(
                format!("聚类_{label}"),
                ClusterStat {
                    size,
                    percentage,
                    center: Some(center),
                },
            );
        }
    }
    stats
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
