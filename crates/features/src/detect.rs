use tracing::debug;

use crate::table::DataTable;

/// 数据集格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// 按地址聚合的图特征表
    AggregatedGraph,
    /// 原始交易流水表
    RawTransaction,
    /// 其他数值表格
    Generic,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::AggregatedGraph => "aggregated-graph",
            DataFormat::RawTransaction => "raw-transaction",
            DataFormat::Generic => "generic",
        }
    }
}

const AGGREGATED_KEYWORDS: [&str; 6] = [
    "degree",
    "transaction",
    "balance",
    "time",
    "clustering",
    "entropy",
];

const TRANSACTION_KEYWORDS: [&str; 6] = ["from", "to", "value", "timestamp", "hash", "block"];

/// 识别数据集格式
///
/// 列名与关键字的每次匹配都计一次命中，总数达到3即判定
/// 对应格式，聚合图优先；都不达标时落入Generic。
pub fn detect_format(table: &DataTable) -> DataFormat {
    let headers: Vec<String> = table
        .headers()
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let aggregated_hits = keyword_hits(&headers, &AGGREGATED_KEYWORDS);
    let transaction_hits = keyword_hits(&headers, &TRANSACTION_KEYWORDS);
    debug!(
        "格式识别: aggregated={} transaction={}",
        aggregated_hits, transaction_hits
    );

    if aggregated_hits >= 3 {
        DataFormat::AggregatedGraph
    } else if transaction_hits >= 3 {
        DataFormat::RawTransaction
    } else {
        DataFormat::Generic
    }
}

// 按(列名, 关键字)对计数，同一关键字在多列命中时累计
fn keyword_hits(headers: &[String], keywords: &[&str]) -> usize {
    headers
        .iter()
        .map(|h| keywords.iter().filter(|kw| h.contains(*kw)).count())
        .sum()
}
