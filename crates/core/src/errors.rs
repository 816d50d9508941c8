use thiserror::Error;

/// 分析引擎错误类型定义
#[derive(Debug, Error)]
pub enum BotscanError {
    #[error("未知算法: {name}")]
    UnknownAlgorithm { name: String },

    #[error("算法重复注册: {name}")]
    DuplicateAlgorithm { name: String },

    #[error("无效的输入数据: {0}")]
    InvalidInput(String),

    #[error("模型尚未训练")]
    NotFitted,

    #[error("算法执行失败: algorithm={algorithm}, stage={stage}, {message}")]
    Execution {
        algorithm: String,
        stage: String,
        message: String,
    },

    #[error("并发任务数已达上限: {limit}")]
    ConcurrencyLimit { limit: usize },

    #[error("取消请求到达过晚: {job_id}")]
    CancellationRace { job_id: i64 },

    #[error("任务已取消: {id}")]
    JobCancelled { id: i64 },

    #[error("任务未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("数据加载失败: {0}")]
    DataLoad(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, BotscanError>;
