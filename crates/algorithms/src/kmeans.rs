use std::collections::HashMap;
use std::time::Instant;

use botscan_core::{BotscanError, Result};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::dbscan::cluster_stats_with_centers;
use crate::metrics;
use crate::strategy::{label_statistics, validate_matrix, AlgorithmStrategy, FitReport};

/// 单个候选K的评估记录
#[derive(Debug, Clone)]
struct Candidate {
    k: usize,
    wcss: f64,
    silhouette: f64,
    calinski: f64,
}

/// 带K值自动选择的K-Means策略
///
/// 在k_range内逐一评估候选K，用轮廓系数、Calinski-Harabasz
/// 和WCSS拐点的加权组合打分。
pub struct KmeansPlusStrategy {
    params: HashMap<String, serde_json::Value>,
    model: Option<KMeans<f64, L2Dist>>,
    n_features: usize,
}

impl KmeansPlusStrategy {
    pub fn new() -> Self {
        let mut params = HashMap::new();
        params.insert("n_clusters".to_string(), json!("auto"));
        params.insert("k_range".to_string(), json!([2, 10]));
        params.insert("max_iter".to_string(), json!(300));
        params.insert("tol".to_string(), json!(1e-4));
        params.insert("random_state".to_string(), json!(42));
        Self {
            params,
            model: None,
            n_features: 0,
        }
    }

    fn random_state(&self) -> u64 {
        self.params
            .get("random_state")
            .and_then(|v| v.as_u64())
            .unwrap_or(42)
    }

    fn max_iter(&self) -> u64 {
        self.params
            .get("max_iter")
            .and_then(|v| v.as_u64())
            .unwrap_or(300)
    }

    fn tol(&self) -> f64 {
        self.params
            .get("tol")
            .and_then(|v| v.as_f64())
            .unwrap_or(1e-4)
    }

    fn k_range(&self) -> (usize, usize) {
        let default = (2, 10);
        match self.params.get("k_range").and_then(|v| v.as_array()) {
            Some(range) if range.len() == 2 => {
                let lo = range[0].as_u64().unwrap_or(2) as usize;
                let hi = range[1].as_u64().unwrap_or(10) as usize;
                (lo.max(2), hi)
            }
            _ => default,
        }
    }

    fn fit_candidate(&self, x: &Array2<f64>, k: usize) -> Result<KMeans<f64, L2Dist>> {
        let rng = Xoshiro256Plus::seed_from_u64(self.random_state());
        let targets = Array1::from_elem(x.nrows(), ());
        let dataset = Dataset::new(x.clone(), targets);
        KMeans::params_with_rng(k, rng)
            .max_n_iterations(self.max_iter())
            .tolerance(self.tol())
            .fit(&dataset)
            .map_err(|e| BotscanError::Internal(format!("K-Means训练失败 (K={k}): {e}")))
    }

    /// 候选K扫描
    ///
    /// 组合得分 = 0.6*轮廓系数 + 0.3*归一化CH + 0.1*WCSS拐点强度，
    /// 轮廓系数非正的候选直接跳过；没有有效候选时回退K=2。
    fn select_k(&self, x: &Array2<f64>) -> usize {
        if let Some(k) = self.params.get("n_clusters").and_then(|v| v.as_u64()) {
            return (k as usize).max(2);
        }

        let n = x.nrows();
        let (k_min, k_range_max) = self.k_range();
        let k_max = k_range_max.min(n.saturating_sub(1));
        if k_min >= k_max {
            return 2;
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for k in k_min..=k_max {
            match self.fit_candidate(x, k) {
                Ok(model) => {
                    let labels: Vec<i64> = model
                        .predict(x)
                        .iter()
                        .map(|l| *l as i64)
                        .collect();
                    let wcss = inertia(x, &labels, model.centroids());
                    candidates.push(Candidate {
                        k,
                        wcss,
                        silhouette: metrics::silhouette_score(x, &labels),
                        calinski: metrics::calinski_harabasz_score(x, &labels),
                    });
                }
                Err(e) => {
                    // 个别K训练失败不影响整体选择
                    warn!("候选K={k}评估失败: {e}");
                }
            }
        }
        if candidates.is_empty() {
            return 2;
        }

        let max_ch = candidates
            .iter()
            .map(|c| c.calinski)
            .fold(0.0f64, f64::max);
        let elbow = elbow_strengths(&candidates);

        let mut best_k = 2;
        let mut best_score = f64::NEG_INFINITY;
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.silhouette <= 0.0 {
                continue;
            }
            let ch_norm = if max_ch > 0.0 {
                candidate.calinski / max_ch
            } else {
                0.0
            };
            let score = 0.6 * candidate.silhouette + 0.3 * ch_norm + 0.1 * elbow[i];
            debug!(
                "候选K={}: sil={:.4} ch={:.2} elbow={:.4} composite={:.4}",
                candidate.k, candidate.silhouette, candidate.calinski, elbow[i], score
            );
            if score > best_score {
                best_score = score;
                best_k = candidate.k;
            }
        }
        best_k
    }
}

/// WCSS序列的归一化二阶差分，端点记0
fn elbow_strengths(candidates: &[Candidate]) -> Vec<f64> {
    let n = candidates.len();
    let mut raw = vec![0.0; n];
    for i in 1..n.saturating_sub(1) {
        raw[i] = (candidates[i - 1].wcss - 2.0 * candidates[i].wcss + candidates[i + 1].wcss).abs();
    }
    let max = raw.iter().cloned().fold(0.0f64, f64::max);
    if max > 0.0 {
        for v in raw.iter_mut() {
            *v /= max;
        }
    }
    raw
}

/// 簇内平方和
fn inertia(x: &Array2<f64>, labels: &[i64], centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let center = centroids.row(*label as usize);
            x.row(i)
                .iter()
                .zip(center.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

impl Default for KmeansPlusStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmStrategy for KmeansPlusStrategy {
    fn name(&self) -> &str {
        "KmeansPlus"
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
                "n_clusters" => {
                    let valid = value.as_u64().map(|v| v >= 2).unwrap_or(false)
                        || value.as_str() == Some("auto");
                    if valid {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的n_clusters参数: {value}");
                        ok = false;
                    }
                }
                "k_range" => {
                    let valid = value
                        .as_array()
                        .map(|a| a.len() == 2 && a.iter().all(|v| v.as_u64().is_some()))
                        .unwrap_or(false);
                    if valid {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的k_range参数: {value}");
                        ok = false;
                    }
                }
                "max_iter" => {
                    if value.as_u64().map(|v| v >= 1).unwrap_or(false) {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的max_iter参数: {value}");
                        ok = false;
                    }
                }
                "tol" => {
                    if value.as_f64().map(|v| v > 0.0).unwrap_or(false) {
                        self.params.insert(key.clone(), value.clone());
                    } else {
                        warn!("无效的tol参数: {value}");
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
                    warn!("KmeansPlus忽略未知参数: {other}");
                }
            }
        }
        ok
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<FitReport> {
        validate_matrix(x)?;
        if x.nrows() < 2 {
            return Err(BotscanError::InvalidInput(
                "K-Means至少需要2个样本".to_string(),
            ));
        }
        let start = Instant::now();

        let k = self.select_k(x).min(x.nrows());
        info!("KmeansPlus训练开始: K={k} 样本数={}", x.nrows());
        let model = self.fit_candidate(x, k)?;

        let labels: Vec<i64> = model.predict(x).iter().map(|l| *l as i64).collect();
        let stats = label_statistics(&labels);
        let silhouette = metrics::silhouette_score(x, &labels);
        let wcss = inertia(x, &labels, model.centroids());
        let cluster_stats = cluster_stats_with_centers(x, &labels);

        let mut parameters_used = HashMap::new();
        parameters_used.insert("n_clusters".to_string(), json!(k));
        parameters_used.insert("k_range".to_string(), self.params["k_range"].clone());
        parameters_used.insert("max_iter".to_string(), json!(self.max_iter()));
        parameters_used.insert("tol".to_string(), json!(self.tol()));
        parameters_used.insert("random_state".to_string(), json!(self.random_state()));

        let mut extra_metrics = HashMap::new();
        extra_metrics.insert("inertia".to_string(), json!(wcss));
        extra_metrics.insert(
            "calinski_harabasz".to_string(),
            json!(metrics::calinski_harabasz_score(x, &labels)),
        );
        extra_metrics.insert(
            "davies_bouldin".to_string(),
            json!(metrics::davies_bouldin_score(x, &labels)),
        );

        self.model = Some(model);
        self.n_features = x.ncols();
        let training_time = start.elapsed().as_secs_f64();
        info!(
            "KmeansPlus训练完成: {}个簇, 轮廓系数{:.4}, 耗时{:.3}s",
            stats.clusters_count, silhouette, training_time
        );

        Ok(FitReport {
            labels,
            clusters_count: stats.clusters_count,
            bot_count: stats.bot_count,
            normal_count: stats.normal_count,
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
        if x.ncols() != self.n_features {
            return Err(BotscanError::InvalidInput(format!(
                "特征维度不匹配: 期望 {} 实际 {}",
                self.n_features,
                x.ncols()
            )));
        }
        validate_matrix(x)?;
        Ok(model.predict(x).iter().map(|l| *l as i64).collect())
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
        map.insert(
            "calinski_harabasz".to_string(),
            metrics::calinski_harabasz_score(x, labels),
        );
        map.insert(
            "davies_bouldin".to_string(),
            metrics::davies_bouldin_score(x, labels),
        );
        map.insert("n_clusters".to_string(), stats.clusters_count as f64);
        Ok(map)
    }
}
