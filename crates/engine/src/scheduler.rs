use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use botscan_core::{
    AlgorithmResult, BotscanError, Job, JobSpec, JobStatus, JobView, Result, SchedulerStats,
};
use tracing::{debug, info, warn};

use crate::runner::JobRunner;

/// 进度回调: (任务id, 百分比, 阶段名)
pub type ProgressSink = Arc<dyn Fn(i64, u8, &str) + Send + Sync>;

/// 完成回调: (任务id, 结果或错误描述, 耗时秒)
pub type CompletionHook =
    Arc<dyn Fn(i64, &std::result::Result<AlgorithmResult, String>, f64) + Send + Sync>;

struct JobEntry {
    job: Job,
    cancel_flag: Arc<AtomicBool>,
}

struct SchedulerState {
    jobs: HashMap<i64, JobEntry>,
    created: u64,
    completed: u64,
    failed: u64,
}

/// 有界并发的任务调度器
///
/// 状态机: pending -> running -> {completed | failed | cancelled}。
/// 任务表由单一互斥锁保护，占用检查和状态迁移在同一临界区内完成。
pub struct JobScheduler {
    runner: Arc<JobRunner>,
    max_concurrent: usize,
    state: Arc<Mutex<SchedulerState>>,
    next_id: AtomicI64,
    progress_sink: Option<ProgressSink>,
    completion_hook: Option<CompletionHook>,
}

impl JobScheduler {
    pub fn new(runner: Arc<JobRunner>, max_concurrent: usize) -> Self {
        Self {
            runner,
            max_concurrent: max_concurrent.max(1),
            state: Arc::new(Mutex::new(SchedulerState {
                jobs: HashMap::new(),
                created: 0,
                completed: 0,
                failed: 0,
            })),
            next_id: AtomicI64::new(0),
            progress_sink: None,
            completion_hook: None,
        }
    }

    /// 附加外部进度回调（例如持久层桥接）
    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// 附加完成回调
    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.completion_hook = Some(hook);
        self
    }

    /// 登记新任务，不触发执行
    pub fn submit(&self, spec: JobSpec) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Job::new(id, spec);
        let mut state = lock_state(&self.state);
        info!("任务{id}已登记: algorithm={}", job.algorithm_name);
        state.jobs.insert(id, JobEntry {
            job,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        });
        state.created += 1;
        id
    }

    /// 启动任务
    ///
    /// 并发已满时返回false且任务保持pending；
    /// 非pending状态的任务也返回false。
    pub fn start(&self, job_id: i64, dataset_path: &Path) -> Result<bool> {
        let (algorithm_name, parameters, cancel_flag) = {
            let mut state = lock_state(&self.state);
            let running = state
                .jobs
                .values()
                .filter(|e| e.job.status == JobStatus::Running)
                .count();
            if running >= self.max_concurrent {
                warn!(
                    "{}",
                    BotscanError::ConcurrencyLimit {
                        limit: self.max_concurrent
                    }
                );
                return Ok(false);
            }

            let entry = state
                .jobs
                .get_mut(&job_id)
                .ok_or(BotscanError::JobNotFound { id: job_id })?;
            if entry.job.status != JobStatus::Pending {
                debug!("任务{job_id}不是pending状态，忽略启动请求");
                return Ok(false);
            }
            entry.job.update_status(JobStatus::Running);
            (
                entry.job.algorithm_name.clone(),
                entry.job.parameters.clone(),
                Arc::clone(&entry.cancel_flag),
            )
        };

        info!("任务{job_id}开始调度: algorithm={algorithm_name}");
        let runner = Arc::clone(&self.runner);
        let state = Arc::clone(&self.state);
        let progress_state = Arc::clone(&self.state);
        let sink = self.progress_sink.clone();
        let hook = self.completion_hook.clone();
        let path = dataset_path.to_path_buf();

        tokio::spawn(async move {
            let worker_cancel = Arc::clone(&cancel_flag);
            let joined = tokio::task::spawn_blocking(move || {
                runner.run(
                    job_id,
                    &algorithm_name,
                    &path,
                    &parameters,
                    worker_cancel.as_ref(),
                    &|progress, stage| {
                        {
                            let mut st = lock_state(&progress_state);
                            if let Some(entry) = st.jobs.get_mut(&job_id) {
                                entry.job.set_progress(progress, stage);
                            }
                        }
                        if let Some(sink) = &sink {
                            sink(job_id, progress, stage);
                        }
                    },
                )
            })
            .await;

            let outcome = match joined {
                Ok(result) => result,
                Err(join_err) => Err(BotscanError::Internal(format!(
                    "执行线程崩溃: {join_err}"
                ))),
            };
            finalize(&state, hook, job_id, outcome);
        });

        Ok(true)
    }

    /// 取消任务
    ///
    /// pending直接取消；running且尚未进入训练阶段时设置协作标志并取消，
    /// 阻塞线程内的流程会在下一个检查点退出，结果被丢弃；
    /// 训练已开始或任务已终止时返回false。
    pub fn cancel(&self, job_id: i64) -> bool {
        let mut state = lock_state(&self.state);
        let Some(entry) = state.jobs.get_mut(&job_id) else {
            return false;
        };
        match entry.job.status {
            JobStatus::Pending => {
                entry.job.update_status(JobStatus::Cancelled);
                info!("任务{job_id}已在等待状态下取消");
                true
            }
            JobStatus::Running if entry.job.progress < 70 => {
                entry.cancel_flag.store(true, Ordering::SeqCst);
                entry.job.update_status(JobStatus::Cancelled);
                info!("任务{job_id}已取消，进度{}%", entry.job.progress);
                true
            }
            JobStatus::Running => {
                warn!("{}", BotscanError::CancellationRace { job_id });
                false
            }
            _ => false,
        }
    }

    pub fn status(&self, job_id: i64) -> Option<JobView> {
        let state = lock_state(&self.state);
        state.jobs.get(&job_id).map(|e| e.job.view())
    }

    pub fn running_jobs(&self) -> Vec<JobView> {
        let state = lock_state(&self.state);
        state
            .jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Running)
            .map(|e| e.job.view())
            .collect()
    }

    pub fn statistics(&self) -> SchedulerStats {
        let state = lock_state(&self.state);
        let running = state
            .jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Running)
            .count();
        SchedulerStats {
            total_jobs_created: state.created,
            total_jobs_completed: state.completed,
            total_jobs_failed: state.failed,
            current_running_jobs: running,
            max_concurrent_jobs: self.max_concurrent,
            success_rate: state.completed as f64 / state.created.max(1) as f64 * 100.0,
        }
    }
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 终结任务，只对仍在running的任务生效一次
fn finalize(
    state: &Mutex<SchedulerState>,
    hook: Option<CompletionHook>,
    job_id: i64,
    outcome: Result<AlgorithmResult>,
) {
    let elapsed = {
        let mut st = lock_state(state);
        let Some(entry) = st.jobs.get_mut(&job_id) else {
            return;
        };
        if entry.job.status != JobStatus::Running {
            // 已被取消或终结，丢弃本次结果
            debug!("任务{job_id}已终止，丢弃执行结果");
            return;
        }
        match &outcome {
            Ok(_) => {
                entry.job.set_progress(100, "分析完成");
                entry.job.update_status(JobStatus::Completed);
                st.completed += 1;
                info!("任务{job_id}已完成");
            }
            Err(BotscanError::JobCancelled { .. }) => {
                entry.job.update_status(JobStatus::Cancelled);
                info!("任务{job_id}在执行中被取消");
            }
            Err(e) => {
                entry.job.error_message = Some(e.to_string());
                entry.job.update_status(JobStatus::Failed);
                st.failed += 1;
                warn!("任务{job_id}执行失败: {e}");
            }
        }
        st.jobs
            .get(&job_id)
            .and_then(|e| e.job.processing_time)
            .unwrap_or(0.0)
    };

    if let Some(hook) = hook {
        let payload = outcome.map_err(|e| e.to_string());
        hook(job_id, &payload, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::time::Duration;

    use botscan_algorithms::strategy::{validate_matrix, AlgorithmStrategy, FitReport};
    use botscan_algorithms::{AlgorithmDescriptor, AlgorithmRegistry};
    use botscan_core::FeatureConfig;
    use ndarray::Array2;

    use super::*;

    /// 训练时长可控的测试算法，用于并发与取消测试
    struct SlowStrategy {
        params: HashMap<String, serde_json::Value>,
        fitted: bool,
        delay: Duration,
    }

    impl SlowStrategy {
        fn new(delay: Duration) -> Self {
            Self {
                params: HashMap::new(),
                fitted: false,
                delay,
            }
        }
    }

    impl AlgorithmStrategy for SlowStrategy {
        fn name(&self) -> &str {
            "Slow"
        }
        fn params(&self) -> &HashMap<String, serde_json::Value> {
            &self.params
        }
        fn is_fitted(&self) -> bool {
            self.fitted
        }
        fn configure(&mut self, _params: &HashMap<String, serde_json::Value>) -> bool {
            true
        }
        fn fit(&mut self, x: &Array2<f64>) -> Result<FitReport> {
            validate_matrix(x)?;
            std::thread::sleep(self.delay);
            self.fitted = true;
            let n = x.nrows();
            Ok(FitReport {
                labels: vec![0; n],
                clusters_count: 1,
                bot_count: 0,
                normal_count: n,
                noise_count: 0,
                silhouette_score: 0.0,
                cluster_stats: BTreeMap::new(),
                extra_metrics: HashMap::new(),
                parameters_used: HashMap::new(),
                training_time: self.delay.as_secs_f64(),
            })
        }
        fn predict(&self, x: &Array2<f64>) -> Result<Vec<i64>> {
            if !self.fitted {
                return Err(BotscanError::NotFitted);
            }
            Ok(vec![0; x.nrows()])
        }
        fn evaluate(&self, _x: &Array2<f64>, _labels: &[i64]) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
    }

    fn slow_registry(delay_ms: u64) -> AlgorithmRegistry {
        let mut registry = AlgorithmRegistry::new();
        registry
            .register(
                AlgorithmDescriptor {
                    name: "Slow".to_string(),
                    description: "测试用慢算法".to_string(),
                    author: "测试".to_string(),
                    version: "0.1".to_string(),
                },
                Box::new(move || {
                    Box::new(SlowStrategy::new(Duration::from_millis(delay_ms)))
                        as Box<dyn AlgorithmStrategy>
                }),
            )
            .unwrap();
        registry
    }

    fn write_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x1,x2").unwrap();
        for i in 0..30 {
            writeln!(file, "{},{}", i as f64 * 0.1, (i % 3) as f64).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn spec(name: &str, algorithm: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            description: String::new(),
            algorithm_name: algorithm.to_string(),
            dataset: "test.csv".to_string(),
            parameters: HashMap::new(),
        }
    }

    fn scheduler_with(registry: AlgorithmRegistry, max_concurrent: usize) -> JobScheduler {
        let runner = Arc::new(JobRunner::new(
            Arc::new(registry),
            FeatureConfig {
                scaler: "robust".to_string(),
                use_optimized_features: true,
            },
        ));
        JobScheduler::new(runner, max_concurrent)
    }

    async fn wait_terminal(scheduler: &JobScheduler, job_id: i64) -> JobView {
        for _ in 0..200 {
            let view = scheduler.status(job_id).unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("任务{job_id}未在限时内终止");
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let file = write_csv();
        let scheduler = scheduler_with(slow_registry(10), 3);
        let id = scheduler.submit(spec("job", "Slow"));

        let view = scheduler.status(id).unwrap();
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.progress, 0);

        assert!(scheduler.start(id, file.path()).unwrap());
        let view = wait_terminal(&scheduler, id).await;
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);
        assert_eq!(view.current_stage, "分析完成");
        assert!(view.processing_time.is_some());
    }

    #[tokio::test]
    async fn test_concurrency_bound_leaves_job_pending() {
        let file = write_csv();
        let scheduler = scheduler_with(slow_registry(800), 2);
        let a = scheduler.submit(spec("a", "Slow"));
        let b = scheduler.submit(spec("b", "Slow"));
        let c = scheduler.submit(spec("c", "Slow"));

        assert!(scheduler.start(a, file.path()).unwrap());
        assert!(scheduler.start(b, file.path()).unwrap());
        // 已达上限，第三个任务被拒绝且保持pending
        assert!(!scheduler.start(c, file.path()).unwrap());
        assert_eq!(scheduler.status(c).unwrap().status, JobStatus::Pending);
        assert_eq!(scheduler.running_jobs().len(), 2);

        wait_terminal(&scheduler, a).await;
        wait_terminal(&scheduler, b).await;
        // 槽位释放后可以启动
        assert!(scheduler.start(c, file.path()).unwrap());
        wait_terminal(&scheduler, c).await;
    }

    #[tokio::test]
    async fn test_cancel_pending_always_succeeds() {
        let scheduler = scheduler_with(slow_registry(10), 3);
        let id = scheduler.submit(spec("job", "Slow"));
        assert!(scheduler.cancel(id));
        assert_eq!(scheduler.status(id).unwrap().status, JobStatus::Cancelled);

        // 已取消的任务无法启动
        let file = write_csv();
        assert!(!scheduler.start(id, file.path()).unwrap());
    }

    #[tokio::test]
    async fn test_cancel_completed_returns_false() {
        let file = write_csv();
        let scheduler = scheduler_with(slow_registry(10), 3);
        let id = scheduler.submit(spec("job", "Slow"));
        scheduler.start(id, file.path()).unwrap();
        wait_terminal(&scheduler, id).await;
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.status(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_after_training_started_returns_false() {
        let file = write_csv();
        let scheduler = scheduler_with(slow_registry(1500), 3);
        let id = scheduler.submit(spec("job", "Slow"));
        scheduler.start(id, file.path()).unwrap();

        // 等待进入训练阶段
        for _ in 0..100 {
            if scheduler.status(id).unwrap().progress >= 70 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(scheduler.status(id).unwrap().progress >= 70);
        assert!(!scheduler.cancel(id));

        let view = wait_terminal(&scheduler, id).await;
        assert_eq!(view.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_job_operations() {
        let scheduler = scheduler_with(slow_registry(10), 3);
        assert!(scheduler.status(99).is_none());
        assert!(!scheduler.cancel(99));
        let file = write_csv();
        assert!(matches!(
            scheduler.start(99, file.path()).unwrap_err(),
            BotscanError::JobNotFound { id: 99 }
        ));
    }

    #[tokio::test]
    async fn test_statistics_success_rate() {
        let file = write_csv();
        let scheduler = scheduler_with(slow_registry(10), 4);

        // 3个成功，1个因数据文件缺失失败
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = scheduler.submit(spec(&format!("ok-{i}"), "Slow"));
            scheduler.start(id, file.path()).unwrap();
            ids.push(id);
        }
        let bad = scheduler.submit(spec("bad", "Slow"));
        scheduler.start(bad, Path::new("/no/such/file.csv")).unwrap();
        ids.push(bad);

        for id in &ids {
            wait_terminal(&scheduler, *id).await;
        }

        let stats = scheduler.statistics();
        assert_eq!(stats.total_jobs_created, 4);
        assert_eq!(stats.total_jobs_completed, 3);
        assert_eq!(stats.total_jobs_failed, 1);
        assert_eq!(stats.current_running_jobs, 0);
        assert!((stats.success_rate - 75.0).abs() < 1e-9);
        assert_eq!(
            scheduler.status(bad).unwrap().status,
            JobStatus::Failed
        );
        assert!(scheduler.status(bad).unwrap().error_message.is_some());
    }

    #[tokio::test]
    async fn test_progress_sink_and_completion_hook() {
        let file = write_csv();
        let progress_log: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let completion: Arc<Mutex<Option<(i64, bool, f64)>>> = Arc::new(Mutex::new(None));

        let log = Arc::clone(&progress_log);
        let done = Arc::clone(&completion);
        let runner = Arc::new(JobRunner::new(
            Arc::new(slow_registry(10)),
            FeatureConfig {
                scaler: "standard".to_string(),
                use_optimized_features: false,
            },
        ));
        let scheduler = JobScheduler::new(runner, 2)
            .with_progress_sink(Arc::new(move |_, p, _| log.lock().unwrap().push(p)))
            .with_completion_hook(Arc::new(move |id, result, elapsed| {
                *done.lock().unwrap() = Some((id, result.is_ok(), elapsed));
            }));

        let id = scheduler.submit(spec("job", "Slow"));
        scheduler.start(id, file.path()).unwrap();
        wait_terminal(&scheduler, id).await;
        // 回调在finalize之后触发，稍等片刻
        tokio::time::sleep(Duration::from_millis(100)).await;

        let progress = progress_log.lock().unwrap().clone();
        assert_eq!(progress, vec![10, 30, 50, 70, 90, 100]);
        let (done_id, ok, _) = completion.lock().unwrap().unwrap();
        assert_eq!(done_id, id);
        assert!(ok);
    }
}
