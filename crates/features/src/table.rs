use std::io::Read;
use std::path::Path;

use botscan_core::{BotscanError, Result};
use tracing::debug;

/// 列数据，加载时一次性判定数值列
#[derive(Debug, Clone)]
enum ColumnData {
    /// 所有非空单元格都能解析为f64，空单元格记为缺失
    Numeric(Vec<Option<f64>>),
    Text(Vec<String>),
}

/// 内存中的CSV表格
#[derive(Debug, Clone)]
pub struct DataTable {
    headers: Vec<String>,
    columns: Vec<ColumnData>,
    n_rows: usize,
}

/// 表格质量报告
#[derive(Debug, Clone)]
pub struct TableReport {
    pub n_rows: usize,
    pub n_columns: usize,
    pub numeric_columns: usize,
    /// 取值恒定的数值列
    pub constant_columns: Vec<String>,
}

impl DataTable {
    /// 从CSV文件加载
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| BotscanError::DataLoad(format!("打开文件失败 {}: {e}", path.display())))?;
        Self::from_csv_reader(file)
    }

    /// 从任意reader加载CSV
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| BotscanError::DataLoad(format!("读取CSV表头失败: {e}")))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        if headers.is_empty() {
            return Err(BotscanError::DataLoad("CSV表头为空".to_string()));
        }

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        let mut n_rows = 0usize;
        for record in csv_reader.records() {
            let record =
                record.map_err(|e| BotscanError::DataLoad(format!("读取CSV记录失败: {e}")))?;
            for (i, cell) in cells.iter_mut().enumerate() {
                cell.push(record.get(i).unwrap_or("").to_string());
            }
            n_rows += 1;
        }

        if n_rows == 0 {
            return Err(BotscanError::DataLoad("CSV中没有数据行".to_string()));
        }

        let columns = cells
            .into_iter()
            .map(|raw| Self::classify_column(&raw))
            .collect();

        debug!("CSV加载完成: {} 行 x {} 列", n_rows, headers.len());
        Ok(Self {
            headers,
            columns,
            n_rows,
        })
    }

    /// 非空单元格全部可解析且至少存在一个时判定为数值列
    fn classify_column(raw: &[String]) -> ColumnData {
        let mut parsed: Vec<Option<f64>> = Vec::with_capacity(raw.len());
        let mut any_value = false;
        for cell in raw {
            if cell.is_empty() {
                parsed.push(None);
                continue;
            }
            match cell.parse::<f64>() {
                Ok(v) => {
                    parsed.push(Some(v));
                    any_value = true;
                }
                Err(_) => {
                    return ColumnData::Text(raw.to_vec());
                }
            }
        }
        if any_value {
            ColumnData::Numeric(parsed)
        } else {
            ColumnData::Text(raw.to_vec())
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// 数值列取值，非数值列或不存在时返回None
    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        let idx = self.column_index(name)?;
        match &self.columns[idx] {
            ColumnData::Numeric(values) => Some(values),
            ColumnData::Text(_) => None,
        }
    }

    /// 文本列取值
    pub fn text(&self, name: &str) -> Option<&[String]> {
        let idx = self.column_index(name)?;
        match &self.columns[idx] {
            ColumnData::Text(values) => Some(values),
            ColumnData::Numeric(_) => None,
        }
    }

    pub fn numeric_column_names(&self) -> Vec<&str> {
        self.headers
            .iter()
            .zip(self.columns.iter())
            .filter(|(_, c)| matches!(c, ColumnData::Numeric(_)))
            .map(|(h, _)| h.as_str())
            .collect()
    }

    /// 表格质量检查，供执行前的预检使用
    pub fn report(&self) -> TableReport {
        let mut constant_columns = Vec::new();
        let mut numeric_columns = 0usize;

        for (header, column) in self.headers.iter().zip(self.columns.iter()) {
            if let ColumnData::Numeric(values) = column {
                numeric_columns += 1;
                let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
                if !present.is_empty()
                    && present.iter().all(|v| (*v - present[0]).abs() < f64::EPSILON)
                {
                    constant_columns.push(header.clone());
                }
            }
        }

        TableReport {
            n_rows: self.n_rows,
            n_columns: self.headers.len(),
            numeric_columns,
            constant_columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn table_from_str(csv: &str) -> DataTable {
        DataTable::from_csv_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_numeric_column_inference() {
        let table = table_from_str("addr,in_degree,balance\nabc,3,1.5\ndef,7,\n");
        assert_eq!(table.n_rows(), 2);
        assert!(table.text("addr").is_some());
        assert_eq!(
            table.numeric("in_degree").unwrap(),
            &[Some(3.0), Some(7.0)]
        );
        // 空单元格记为缺失
        assert_eq!(table.numeric("balance").unwrap()[1], None);
        assert_eq!(table.numeric_column_names(), vec!["in_degree", "balance"]);
    }

    #[test]
    fn test_mixed_column_is_text() {
        let table = table_from_str("col\n1\nabc\n");
        assert!(table.numeric("col").is_none());
        assert!(table.text("col").is_some());
    }

    #[test]
    fn test_empty_csv_rejected() {
        let err = DataTable::from_csv_reader("a,b\n".as_bytes()).unwrap_err();
        assert!(matches!(err, BotscanError::DataLoad(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x,y\n1,2\n3,4").unwrap();
        let table = DataTable::from_csv_path(file.path()).unwrap();
        assert_eq!(table.n_rows(), 2);
    }

    #[test]
    fn test_missing_path_is_data_load_error() {
        let err = DataTable::from_csv_path(Path::new("/no/such/file.csv")).unwrap_err();
        assert!(matches!(err, BotscanError::DataLoad(_)));
    }

    #[test]
    fn test_report_flags_constant_columns() {
        let table = table_from_str("a,b,c\n1,5,\n2,5,\n3,5,\n");
        let report = table.report();
        assert_eq!(report.n_rows, 3);
        assert_eq!(report.constant_columns, vec!["b".to_string()]);
        // c列全空，被判为文本列而不是空数值列
        assert_eq!(report.numeric_columns, 2);
    }
}
