use std::collections::{BTreeMap, HashMap};

use botscan_core::{BotscanError, ClusterStat, Result};
use ndarray::Array2;

/// 单次训练的结果报告
#[derive(Debug, Clone)]
pub struct FitReport {
    /// 每个样本的标签，-1表示噪声点
    pub labels: Vec<i64>,
    pub clusters_count: usize,
    pub bot_count: usize,
    pub normal_count: usize,
    pub noise_count: usize,
    pub silhouette_score: f64,
    pub cluster_stats: BTreeMap<String, ClusterStat>,
    pub extra_metrics: HashMap<String, serde_json::Value>,
    pub parameters_used: HashMap<String, serde_json::Value>,
    /// 训练耗时（秒）
    pub training_time: f64,
}

/// 检测算法策略接口
///
/// 实现是同步的，由调度器放入阻塞线程执行。
pub trait AlgorithmStrategy: Send {
    fn name(&self) -> &str;

    fn params(&self) -> &HashMap<String, serde_json::Value>;

    fn is_fitted(&self) -> bool;

    /// 应用用户参数，未知参数记录警告后忽略
    ///
    /// 返回false表示存在类型不合法的参数值。
    fn configure(&mut self, params: &HashMap<String, serde_json::Value>) -> bool;

    /// 训练模型，失败时必须保持未训练状态
    fn fit(&mut self, x: &Array2<f64>) -> Result<FitReport>;

    /// 对新数据打标签，未训练时返回NotFitted
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<i64>>;

    /// 计算质量指标
    fn evaluate(&self, x: &Array2<f64>, labels: &[i64]) -> Result<HashMap<String, f64>>;
}

/// 训练输入校验: 非空且全部有限
pub fn validate_matrix(x: &Array2<f64>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(BotscanError::InvalidInput("特征矩阵没有样本".to_string()));
    }
    if x.ncols() == 0 {
        return Err(BotscanError::InvalidInput("特征矩阵没有特征列".to_string()));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(BotscanError::InvalidInput(
            "特征矩阵包含NaN或无穷值".to_string(),
        ));
    }
    Ok(())
}

/// 标签统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelStats {
    pub clusters_count: usize,
    pub bot_count: usize,
    pub normal_count: usize,
    pub noise_count: usize,
}

/// 从聚类标签推导正常/机器人划分
///
/// 至少2个簇时按大小降序累加进正常集合，累计不超过总量的80%，
/// 首个放不下的簇处停止；一个簇都放不进时回退为最大簇。
/// 不足2个簇时全部样本记为机器人。其余样本（含噪声）同样记为机器人。
pub fn label_statistics(labels: &[i64]) -> LabelStats {
    let total = labels.len();
    let noise_count = labels.iter().filter(|l| **l == -1).count();

    let mut sizes: HashMap<i64, usize> = HashMap::new();
    for label in labels.iter().filter(|l| **l >= 0) {
        *sizes.entry(*label).or_insert(0) += 1;
    }
    let clusters_count = sizes.len();

    let mut ordered: Vec<usize> = sizes.values().copied().collect();
    ordered.sort_unstable_by(|a, b| b.cmp(a));

    let budget = (total as f64 * 0.80) as usize;
    let mut normal_count = 0usize;
    if clusters_count > 1 {
        for size in &ordered {
            if normal_count + size <= budget {
                normal_count += size;
            } else {
                break;
            }
        }
        if normal_count == 0 {
            normal_count = ordered.first().copied().unwrap_or(0);
        }
    }
    let bot_count = total - normal_count;

    LabelStats {
        clusters_count,
        bot_count,
        normal_count,
        noise_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_validate_rejects_empty() {
        let x: Array2<f64> = Array2::zeros((0, 3));
        assert!(matches!(
            validate_matrix(&x).unwrap_err(),
            BotscanError::InvalidInput(_)
        ));
        let x: Array2<f64> = Array2::zeros((3, 0));
        assert!(validate_matrix(&x).is_err());
    }

    #[test]
    fn test_validate_rejects_nan_and_inf() {
        let x = array![[1.0, f64::NAN], [2.0, 3.0]];
        assert!(validate_matrix(&x).is_err());
        let x = array![[1.0, f64::INFINITY]];
        assert!(validate_matrix(&x).is_err());
    }

    #[test]
    fn test_validate_accepts_finite() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(validate_matrix(&x).is_ok());
    }

    #[test]
    fn test_label_statistics_majority_cluster_is_normal() {
        // 80个0、15个1、5个噪声
        let mut labels = vec![0i64; 80];
        labels.extend(vec![1i64; 15]);
        labels.extend(vec![-1i64; 5]);

        let stats = label_statistics(&labels);
        assert_eq!(stats.clusters_count, 2);
        assert_eq!(stats.noise_count, 5);
        assert_eq!(stats.normal_count, 80);
        assert_eq!(stats.bot_count, 20);
    }

    #[test]
    fn test_label_statistics_oversized_cluster_fallback() {
        // 最大簇占85%，超过80%预算时回退为最大簇
        let mut labels = vec![0i64; 85];
        labels.extend(vec![1i64; 10]);
        labels.extend(vec![-1i64; 5]);

        let stats = label_statistics(&labels);
        assert_eq!(stats.normal_count, 85);
        assert_eq!(stats.bot_count, 15);
    }

    #[test]
    fn test_label_statistics_accumulates_multiple_clusters() {
        // 50 + 30 = 80 <= 80%预算，20个散点归为机器人
        let mut labels = vec![0i64; 50];
        labels.extend(vec![1i64; 30]);
        labels.extend(vec![2i64; 20]);

        let stats = label_statistics(&labels);
        assert_eq!(stats.normal_count, 80);
        assert_eq!(stats.bot_count, 20);
        assert_eq!(stats.noise_count, 0);
    }

    #[test]
    fn test_label_statistics_stops_at_first_oversized_cluster() {
        // 70放得下，70+15超预算即停止，之后的10不再累加
        let mut labels = vec![0i64; 70];
        labels.extend(vec![1i64; 15]);
        labels.extend(vec![2i64; 10]);
        labels.extend(vec![-1i64; 5]);

        let stats = label_statistics(&labels);
        assert_eq!(stats.normal_count, 70);
        assert_eq!(stats.bot_count, 30);
    }

    #[test]
    fn test_label_statistics_single_cluster_is_all_bots() {
        // 不足2个簇时无法区分正常群体，全部记为机器人
        let stats = label_statistics(&vec![0i64; 50]);
        assert_eq!(stats.clusters_count, 1);
        assert_eq!(stats.normal_count, 0);
        assert_eq!(stats.bot_count, 50);

        let mut labels = vec![0i64; 40];
        labels.extend(vec![-1i64; 10]);
        let stats = label_statistics(&labels);
        assert_eq!(stats.normal_count, 0);
        assert_eq!(stats.bot_count, 50);
    }

    #[test]
    fn test_label_statistics_all_noise() {
        let labels = vec![-1i64; 10];
        let stats = label_statistics(&labels);
        assert_eq!(stats.clusters_count, 0);
        assert_eq!(stats.normal_count, 0);
        assert_eq!(stats.bot_count, 10);
        assert_eq!(stats.noise_count, 10);
    }
}
