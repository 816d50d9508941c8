use botscan_core::stats::{mean, percentile, std_dev};
use botscan_core::{BotscanError, Result};
use ndarray::Array2;
use tracing::debug;

/// 标准化方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerKind {
    /// 中位数/四分位距，对离群点稳健
    Robust,
    /// 均值/标准差
    Standard,
}

impl ScalerKind {
    pub fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "robust" => Ok(ScalerKind::Robust),
            "standard" => Ok(ScalerKind::Standard),
            other => Err(BotscanError::Configuration(format!(
                "不支持的标准化方法: {other}"
            ))),
        }
    }
}

/// 列级标准化器，fit后保留中心和尺度参数
#[derive(Debug, Clone)]
pub struct Scaler {
    kind: ScalerKind,
    centers: Option<Vec<f64>>,
    scales: Option<Vec<f64>>,
}

impl Scaler {
    pub fn new(kind: ScalerKind) -> Self {
        Self {
            kind,
            centers: None,
            scales: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.centers.is_some()
    }

    /// 拟合并变换
    pub fn normalize(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(BotscanError::InvalidInput("特征矩阵为空".to_string()));
        }

        let mut centers = Vec::with_capacity(x.ncols());
        let mut scales = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let values: Vec<f64> = column.to_vec();
            let (center, scale) = match self.kind {
                ScalerKind::Robust => {
                    let median = percentile(&values, 50.0);
                    let iqr = percentile(&values, 75.0) - percentile(&values, 25.0);
                    (median, iqr)
                }
                ScalerKind::Standard => (mean(&values), std_dev(&values)),
            };
            centers.push(center);
            // 尺度为0的恒定列保持原样
            scales.push(if scale == 0.0 { 1.0 } else { scale });
        }

        debug!("标准化器拟合完成: {:?}, {} 列", self.kind, x.ncols());
        self.centers = Some(centers);
        self.scales = Some(scales);
        self.transform(x)
    }

    /// 用已拟合的参数变换新数据
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let centers = self.centers.as_ref().ok_or(BotscanError::NotFitted)?;
        let scales = self.scales.as_ref().ok_or(BotscanError::NotFitted)?;
        if x.ncols() != centers.len() {
            return Err(BotscanError::InvalidInput(format!(
                "特征维度不匹配: 期望 {} 实际 {}",
                centers.len(),
                x.ncols()
            )));
        }

        let mut out = x.clone();
        for (j, mut column) in out.columns_mut().into_iter().enumerate() {
            for value in column.iter_mut() {
                *value = (*value - centers[j]) / scales[j];
            }
        }
        Ok(out)
    }
}
