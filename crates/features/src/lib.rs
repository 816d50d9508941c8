//! 特征管线
//!
//! 从CSV表格到标准化特征矩阵的完整流程:
//! 加载 -> 格式识别 -> 特征提取 -> 标准化。

pub mod detect;
pub mod extract;
pub mod scaling;
pub mod table;

pub use detect::{detect_format, DataFormat};
pub use extract::{FeatureExtractor, FeatureMatrix};
pub use scaling::{Scaler, ScalerKind};
pub use table::{DataTable, TableReport};
