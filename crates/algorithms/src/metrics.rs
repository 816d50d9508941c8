//! 聚类质量指标
//!
//! 忽略标签为-1的噪声点。输入标签与矩阵行一一对应。

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1};

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn cluster_members(labels: &[i64]) -> HashMap<i64, Vec<usize>> {
    let mut members: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, label) in labels.iter().enumerate() {
        if *label >= 0 {
            members.entry(*label).or_default().push(i);
        }
    }
    members
}

fn centroid(x: &Array2<f64>, indices: &[usize]) -> Array1<f64> {
    let mut center = Array1::zeros(x.ncols());
    for idx in indices {
        center = center + x.row(*idx);
    }
    center / indices.len() as f64
}

/// 轮廓系数，O(n^2)
///
/// 单点簇的样本贡献0，少于2个簇时返回0。
pub fn silhouette_score(x: &Array2<f64>, labels: &[i64]) -> f64 {
    let members = cluster_members(labels);
    if members.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut counted = 0usize;
    for (&label, indices) in &members {
        for &i in indices {
            if indices.len() < 2 {
                counted += 1;
                continue;
            }
            let a: f64 = indices
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| euclidean(x.row(i), x.row(j)))
                .sum::<f64>()
                / (indices.len() - 1) as f64;

            let mut b = f64::INFINITY;
            for (&other, other_indices) in &members {
                if other == label {
                    continue;
                }
                let d: f64 = other_indices
                    .iter()
                    .map(|&j| euclidean(x.row(i), x.row(j)))
                    .sum::<f64>()
                    / other_indices.len() as f64;
                b = b.min(d);
            }

            let denom = a.max(b);
            if denom > 0.0 {
                total += (b - a) / denom;
            }
            counted += 1;
        }
    }

    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

/// Calinski-Harabasz指数，值越大簇间分离越好
pub fn calinski_harabasz_score(x: &Array2<f64>, labels: &[i64]) -> f64 {
    let members = cluster_members(labels);
    let k = members.len();
    let n: usize = members.values().map(|m| m.len()).sum();
    if k < 2 || n <= k {
        return 0.0;
    }

    let all_indices: Vec<usize> = members.values().flatten().copied().collect();
    let overall = centroid(x, &all_indices);

    let mut between = 0.0;
    let mut within = 0.0;
    for indices in members.values() {
        let center = centroid(x, indices);
        let d = euclidean(center.view(), overall.view());
        between += indices.len() as f64 * d * d;
        for &i in indices {
            let d = euclidean(x.row(i), center.view());
            within += d * d;
        }
    }

    if within == 0.0 {
        return 0.0;
    }
    (between / (k - 1) as f64) / (within / (n - k) as f64)
}

/// Davies-Bouldin指数，值越小越好
pub fn davies_bouldin_score(x: &Array2<f64>, labels: &[i64]) -> f64 {
    let members = cluster_members(labels);
    let k = members.len();
    if k < 2 {
        return 0.0;
    }

    let clusters: Vec<(&i64, &Vec<usize>)> = members.iter().collect();
    let centers: Vec<Array1<f64>> = clusters.iter().map(|(_, m)| centroid(x, m)).collect();
    let scatters: Vec<f64> = clusters
        .iter()
        .zip(centers.iter())
        .map(|((_, indices), center)| {
            indices
                .iter()
                .map(|&i| euclidean(x.row(i), center.view()))
                .sum::<f64>()
                / indices.len() as f64
        })
        .collect();

    let mut total = 0.0;
    for i in 0..k {
        let mut worst: f64 = 0.0;
        for j in 0..k {
            if i == j {
                continue;
            }
            let separation = euclidean(centers[i].view(), centers[j].view());
            if separation > 0.0 {
                worst = worst.max((scatters[i] + scatters[j]) / separation);
            }
        }
        total += worst;
    }
    total / k as f64
}
