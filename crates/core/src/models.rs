use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// 任务创建请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub description: String,
    pub algorithm_name: String,
    pub dataset: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

/// 分析任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub algorithm_name: String,
    pub dataset: String,
    pub parameters: HashMap<String, serde_json::Value>,
    pub status: JobStatus,
    /// 进度百分比，0..=100
    pub progress: u8,
    pub current_stage: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 总处理耗时（秒）
    pub processing_time: Option<f64>,
}

impl Job {
    pub fn new(id: i64, spec: JobSpec) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            algorithm_name: spec.algorithm_name,
            dataset: spec.dataset,
            parameters: spec.parameters,
            status: JobStatus::Pending,
            progress: 0,
            current_stage: "等待调度".to_string(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time: None,
        }
    }

    /// 状态迁移，首次进入运行/终止状态时打时间戳
    pub fn update_status(&mut self, status: JobStatus) {
        self.status = status;
        let now = Utc::now();
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
            if let Some(started) = self.started_at {
                let elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
                self.processing_time = Some(elapsed.max(0.0));
            }
        }
    }

    /// 运行期间的进度更新，只允许单调递增
    pub fn set_progress(&mut self, progress: u8, stage: &str) {
        if self.status != JobStatus::Running {
            return;
        }
        if progress >= self.progress {
            self.progress = progress.min(100);
            self.current_stage = stage.to_string();
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            name: self.name.clone(),
            algorithm_name: self.algorithm_name.clone(),
            status: self.status,
            progress: self.progress,
            current_stage: self.current_stage.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            processing_time: self.processing_time,
        }
    }
}

/// 任务状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: i64,
    pub name: String,
    pub algorithm_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_stage: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time: Option<f64>,
}

/// 调度器统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_jobs_created: u64,
    pub total_jobs_completed: u64,
    pub total_jobs_failed: u64,
    pub current_running_jobs: usize,
    pub max_concurrent_jobs: usize,
    /// 成功率百分比 = completed / max(created, 1) * 100
    pub success_rate: f64,
}

/// 单个聚类的统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStat {
    pub size: usize,
    pub percentage: f64,
    pub center: Option<Vec<f64>>,
}

/// 归一化的分析结果，所有字段均为普通标量或容器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub algorithm_name: String,
    pub labels: Vec<i64>,
    pub clusters_count: usize,
    pub total_addresses: usize,
    pub bot_addresses_count: usize,
    pub bot_addresses_percentage: f64,
    pub normal_addresses_count: usize,
    pub normal_addresses_percentage: f64,
    pub noise_points: usize,
    pub noise_percentage: f64,
    pub silhouette_score: f64,
    pub cluster_stats: BTreeMap<String, ClusterStat>,
    pub extra_metrics: HashMap<String, serde_json::Value>,
    pub parameters_used: HashMap<String, serde_json::Value>,
    pub feature_count: usize,
    pub data_format: String,
    pub processing_time: f64,
}
