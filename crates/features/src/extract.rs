use std::collections::BTreeMap;

use botscan_core::stats::{mean, median, std_dev};
use botscan_core::{BotscanError, Result};
use ndarray::Array2;
use tracing::{debug, info};

use crate::detect::DataFormat;
use crate::table::DataTable;

/// 精选的高质量特征列，按固定顺序输出
const OPTIMIZED_FEATURES: [&str; 15] = [
    "in_degree",
    "out_degree",
    "Mean time interval",
    "Total amount incoming",
    "Total amount outgoing",
    "all_degree",
    "Max amount incoming",
    "Max amount outgoing",
    "Min amount incoming",
    "Min amount outgoing",
    "Avg amount incoming",
    "Avg amount outgoing",
    "Avg time incoming",
    "Avg time outgoing",
    "Active Duration",
];

/// 低区分度或泄漏标签的列，始终剔除
const REMOVED_FEATURES: [&str; 9] = [
    "unique out_degree",
    "unique in_degree",
    "Clustering coefficient",
    "Min time interval",
    "Max time interval",
    "Total transaction time",
    "Avg gas price",
    "Avg gas limit",
    "Scam",
];

/// 时间量纲的列，做log1p压缩长尾
const TIME_COLUMNS: [&str; 4] = [
    "Mean time interval",
    "Avg time incoming",
    "Avg time outgoing",
    "Active Duration",
];

/// 提取后的特征矩阵，任务级临时对象
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub data: Array2<f64>,
    pub feature_names: Vec<String>,
    pub format: DataFormat,
}

impl FeatureMatrix {
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }
}

/// 特征提取器
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    use_optimized: bool,
}

impl FeatureExtractor {
    pub fn new(use_optimized: bool) -> Self {
        Self { use_optimized }
    }

    /// 按数据格式提取特征矩阵
    pub fn extract(&self, table: &DataTable, format: DataFormat) -> Result<FeatureMatrix> {
        let matrix = match format {
            DataFormat::AggregatedGraph => self.extract_aggregated(table)?,
            DataFormat::RawTransaction => self.extract_transactions(table)?,
            DataFormat::Generic => self.extract_generic(table)?,
        };
        info!(
            "特征提取完成: format={} samples={} features={}",
            format.as_str(),
            matrix.n_samples(),
            matrix.n_features()
        );
        Ok(matrix)
    }

    fn extract_aggregated(&self, table: &DataTable) -> Result<FeatureMatrix> {
        let candidates: Vec<&str> = table
            .numeric_column_names()
            .into_iter()
            .filter(|name| !REMOVED_FEATURES.contains(name))
            .collect();

        if candidates.is_empty() {
            return Err(BotscanError::InvalidInput(
                "聚合数据中没有可用的数值特征列".to_string(),
            ));
        }

        let optimized_present: Vec<&str> = OPTIMIZED_FEATURES
            .iter()
            .filter(|name| candidates.contains(name))
            .copied()
            .collect();

        let chosen: Vec<&str> = if self.use_optimized && !optimized_present.is_empty() {
            debug!("使用精选特征列表: {} 列", optimized_present.len());
            optimized_present
        } else {
            candidates
        };

        let mut columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(chosen.len());
        for name in &chosen {
            // chosen 由数值列名过滤而来
            let values = table
                .numeric(name)
                .ok_or_else(|| BotscanError::Internal(format!("数值列丢失: {name}")))?;
            let mut column = values.to_vec();
            if TIME_COLUMNS.contains(name) {
                log1p_column(&mut column);
            }
            clip_3sigma(&mut column);
            impute_median(&mut column);
            columns.push(column);
        }

        build_matrix(table.n_rows(), &chosen, columns, DataFormat::AggregatedGraph)
    }

    /// 按发送方地址聚合原始交易流水
    fn extract_transactions(&self, table: &DataTable) -> Result<FeatureMatrix> {
        let senders = table.text("from").ok_or_else(|| {
            BotscanError::InvalidInput("交易数据缺少文本列 'from'".to_string())
        })?;
        let values = table.numeric("value").ok_or_else(|| {
            BotscanError::InvalidInput("交易数据缺少数值列 'value'".to_string())
        })?;
        let receivers = table.text("to");

        // BTreeMap保证输出行序确定
        let mut grouped: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (sender, value) in senders.iter().zip(values.iter()) {
            grouped
                .entry(sender.as_str())
                .or_default()
                .push(value.unwrap_or(0.0));
        }

        let mut in_degree: BTreeMap<&str, f64> = BTreeMap::new();
        if let Some(receivers) = receivers {
            for receiver in receivers {
                *in_degree.entry(receiver.as_str()).or_insert(0.0) += 1.0;
            }
        }

        let feature_names = [
            "total_value_out",
            "avg_value_out",
            "max_value_out",
            "min_value_out",
            "out_degree",
            "in_degree",
        ];
        let mut rows: Vec<f64> = Vec::with_capacity(grouped.len() * feature_names.len());
        for (sender, sent) in &grouped {
            let total: f64 = sent.iter().sum();
            let max = sent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = sent.iter().cloned().fold(f64::INFINITY, f64::min);
            rows.push(total);
            rows.push(total / sent.len() as f64);
            rows.push(max);
            rows.push(min);
            rows.push(sent.len() as f64);
            rows.push(in_degree.get(sender).copied().unwrap_or(0.0));
        }

        let n_senders = grouped.len();
        let data = Array2::from_shape_vec((n_senders, feature_names.len()), rows)
            .map_err(|e| BotscanError::Internal(format!("构建特征矩阵失败: {e}")))?;
        Ok(FeatureMatrix {
            data,
            feature_names: feature_names.iter().map(|s| s.to_string()).collect(),
            format: DataFormat::RawTransaction,
        })
    }

    fn extract_generic(&self, table: &DataTable) -> Result<FeatureMatrix> {
        let chosen = table.numeric_column_names();
        if chosen.is_empty() {
            return Err(BotscanError::InvalidInput(
                "数据中没有可用的数值列".to_string(),
            ));
        }

        let mut columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(chosen.len());
        for name in &chosen {
            let values = table
                .numeric(name)
                .ok_or_else(|| BotscanError::Internal(format!("数值列丢失: {name}")))?;
            let mut column = values.to_vec();
            impute_median(&mut column);
            columns.push(column);
        }

        build_matrix(table.n_rows(), &chosen, columns, DataFormat::Generic)
    }
}

fn build_matrix(
    n_rows: usize,
    names: &[&str],
    columns: Vec<Vec<Option<f64>>>,
    format: DataFormat,
) -> Result<FeatureMatrix> {
    let n_cols = columns.len();
    let mut values: Vec<f64> = Vec::with_capacity(n_rows * n_cols);
    for row in 0..n_rows {
        for column in &columns {
            values.push(column[row].unwrap_or(0.0));
        }
    }
    let data = Array2::from_shape_vec((n_rows, n_cols), values)
        .map_err(|e| BotscanError::Internal(format!("构建特征矩阵失败: {e}")))?;
    Ok(FeatureMatrix {
        data,
        feature_names: names.iter().map(|s| s.to_string()).collect(),
        format,
    })
}

fn log1p_column(column: &mut [Option<f64>]) {
    for value in column.iter_mut().flatten() {
        // 负的时间值视为0
        *value = value.max(0.0).ln_1p();
    }
}

/// 3倍标准差截断
fn clip_3sigma(column: &mut [Option<f64>]) {
    let present: Vec<f64> = column.iter().filter_map(|v| *v).collect();
    if present.len() < 2 {
        return;
    }
    let m = mean(&present);
    let s = std_dev(&present);
    if s == 0.0 {
        return;
    }
    let lo = m - 3.0 * s;
    let hi = m + 3.0 * s;
    for value in column.iter_mut().flatten() {
        *value = value.clamp(lo, hi);
    }
}

fn impute_median(column: &mut [Option<f64>]) {
    let present: Vec<f64> = column.iter().filter_map(|v| *v).collect();
    let fill = if present.is_empty() {
        0.0
    } else {
        median(&present)
    };
    for value in column.iter_mut() {
        if value.is_none() {
            *value = Some(fill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DataTable;

    fn table_from_str(csv: &str) -> DataTable {
        DataTable::from_csv_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_optimized_features_selected_in_order() {
        let table = table_from_str(
            "address,out_degree,in_degree,extra_metric\na,1,2,3\nb,4,5,6\n",
        );
        let matrix = FeatureExtractor::new(true)
            .extract(&table, DataFormat::AggregatedGraph)
            .unwrap();
        // 精选列表命中的列按列表顺序输出，extra_metric被丢弃
        assert_eq!(matrix.feature_names, vec!["in_degree", "out_degree"]);
        assert_eq!(matrix.data[[0, 0]], 2.0);
        assert_eq!(matrix.data[[0, 1]], 1.0);
    }

    #[test]
    fn test_removed_features_excluded() {
        let table = table_from_str("Scam,Avg gas price,x\n1,2,3\n0,4,5\n");
        let matrix = FeatureExtractor::new(false)
            .extract(&table, DataFormat::AggregatedGraph)
            .unwrap();
        assert_eq!(matrix.feature_names, vec!["x"]);
    }

    #[test]
    fn test_log1p_applied_to_time_columns() {
        let mut csv = String::from("Mean time interval,x\n");
        for _ in 0..4 {
            csv.push_str("100,1\n");
        }
        let table = table_from_str(&csv);
        let matrix = FeatureExtractor::new(false)
            .extract(&table, DataFormat::AggregatedGraph)
            .unwrap();
        let expected = 100.0_f64.ln_1p();
        assert!((matrix.data[[0, 0]] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_3sigma_clipping() {
        // 一个远离均值的离群点被截断到上界
        let mut csv = String::from("x,y\n");
        for _ in 0..99 {
            csv.push_str("1,0\n");
        }
        csv.push_str("1000,0\n");
        let table = table_from_str(&csv);
        let matrix = FeatureExtractor::new(false)
            .extract(&table, DataFormat::AggregatedGraph)
            .unwrap();
        let max = matrix
            .data
            .column(0)
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(max < 1000.0);
    }

    #[test]
    fn test_median_imputation() {
        let table = table_from_str("x,y\n1,1\n,1\n3,1\n");
        let matrix = FeatureExtractor::new(false)
            .extract(&table, DataFormat::Generic)
            .unwrap();
        // 缺失值用中位数2填充
        assert_eq!(matrix.data[[1, 0]], 2.0);
    }

    #[test]
    fn test_transaction_grouping() {
        let table = table_from_str(
            "from,to,value,timestamp\nalice,bob,10,1\nalice,carol,20,2\nbob,alice,5,3\n",
        );
        let matrix = FeatureExtractor::new(true)
            .extract(&table, DataFormat::RawTransaction)
            .unwrap();
        assert_eq!(matrix.n_samples(), 2);
        assert_eq!(matrix.n_features(), 6);
        // BTreeMap排序: alice在前
        assert_eq!(matrix.data[[0, 0]], 30.0); // total
        assert_eq!(matrix.data[[0, 1]], 15.0); // avg
        assert_eq!(matrix.data[[0, 2]], 20.0); // max
        assert_eq!(matrix.data[[0, 3]], 10.0); // min
        assert_eq!(matrix.data[[0, 4]], 2.0); // out_degree
        assert_eq!(matrix.data[[0, 5]], 1.0); // in_degree
    }

    #[test]
    fn test_transaction_missing_from_column() {
        let table = table_from_str("sender,value\na,1\n");
        let err = FeatureExtractor::new(true)
            .extract(&table, DataFormat::RawTransaction)
            .unwrap_err();
        assert!(matches!(err, BotscanError::InvalidInput(_)));
    }

    #[test]
    fn test_generic_without_numeric_columns() {
        let table = table_from_str("a,b\nx,y\nz,w\n");
        let err = FeatureExtractor::new(true)
            .extract(&table, DataFormat::Generic)
            .unwrap_err();
        assert!(matches!(err, BotscanError::InvalidInput(_)));
    }
}
