use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use botscan_algorithms::AlgorithmRegistry;
use botscan_core::{AlgorithmResult, AppConfig, JobSpec, JobStatus};
use botscan_engine::{JobRunner, JobScheduler};
use botscan_features::DataTable;
use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("botscan")
        .version("1.0.0")
        .about("区块链机器人检测分析引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("dataset")
                .short('d')
                .long("dataset")
                .value_name("FILE")
                .help("CSV数据集路径")
                .required(true),
        )
        .arg(
            Arg::new("algorithm")
                .short('a')
                .long("algorithm")
                .value_name("NAME")
                .help("检测算法名称")
                .default_value("DBSCAN"),
        )
        .arg(
            Arg::new("params")
                .short('p')
                .long("params")
                .value_name("JSON")
                .help("算法参数，JSON对象")
                .default_value("{}"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let dataset = matches.get_one::<String>("dataset").unwrap();
    let algorithm = matches.get_one::<String>("algorithm").unwrap();
    let params_raw = matches.get_one::<String>("params").unwrap();
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    // 初始化日志系统
    init_logging(log_level, log_format)?;

    info!("启动机器人检测分析引擎");
    info!("数据集: {dataset}");
    info!("算法: {algorithm}");

    // 加载配置
    let config = AppConfig::load(config_path.map(String::as_str))
        .context("加载配置失败")?;
    config.validate().context("配置校验失败")?;

    let parameters: HashMap<String, serde_json::Value> =
        serde_json::from_str(params_raw).context("解析算法参数失败，需要JSON对象")?;

    // 数据集概览
    let dataset_path = Path::new(dataset);
    let table = DataTable::from_csv_path(dataset_path)
        .with_context(|| format!("读取数据集失败: {dataset}"))?;
    let report = table.report();
    info!(
        "数据集概览: {}行 x {}列, 数值列{}个",
        report.n_rows,
        report.n_columns,
        report.numeric_columns
    );

    // 组装调度器
    let registry = Arc::new(AlgorithmRegistry::with_builtins());
    for descriptor in registry.list() {
        info!(
            "已注册算法: {} v{} - {}",
            descriptor.name, descriptor.version, descriptor.description
        );
    }

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&registry),
        config.features.clone(),
    ));
    let captured: Arc<Mutex<Option<std::result::Result<AlgorithmResult, String>>>> =
        Arc::new(Mutex::new(None));
    let hook_slot = Arc::clone(&captured);
    let scheduler = JobScheduler::new(runner, config.engine.max_concurrent_jobs)
        .with_completion_hook(Arc::new(move |job_id, outcome, elapsed| {
            info!("任务{job_id}结束，耗时{elapsed:.3}秒");
            if let Ok(mut slot) = hook_slot.lock() {
                *slot = Some(outcome.clone());
            }
        }));

    // 提交并执行任务
    let job_id = scheduler.submit(JobSpec {
        name: format!("{algorithm}分析"),
        description: format!("命令行分析: {dataset}"),
        algorithm_name: algorithm.clone(),
        dataset: dataset.clone(),
        parameters,
    });

    if !scheduler.start(job_id, dataset_path)? {
        anyhow::bail!("任务{job_id}启动失败");
    }

    // 轮询进度直至任务终止
    let mut last_progress = 0u8;
    loop {
        let view = scheduler
            .status(job_id)
            .context("任务状态丢失")?;
        if view.progress != last_progress {
            info!("进度 {}%: {}", view.progress, view.current_stage);
            last_progress = view.progress;
        }
        if view.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let stats = scheduler.statistics();
    info!(
        "调度统计: created={} completed={} failed={} success_rate={:.1}%",
        stats.total_jobs_created,
        stats.total_jobs_completed,
        stats.total_jobs_failed,
        stats.success_rate
    );

    let outcome = captured
        .lock()
        .map_err(|_| anyhow::anyhow!("结果锁被污染"))?
        .take();
    match outcome {
        Some(Ok(result)) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            info!("分析引擎退出");
            Ok(())
        }
        Some(Err(message)) => {
            error!("分析失败: {message}");
            Err(anyhow::anyhow!("分析失败: {message}"))
        }
        None => {
            let view = scheduler.status(job_id).context("任务状态丢失")?;
            match view.status {
                JobStatus::Cancelled => Err(anyhow::anyhow!("任务{job_id}已被取消")),
                _ => Err(anyhow::anyhow!(
                    "任务{job_id}异常终止: {}",
                    view.error_message.unwrap_or_else(|| "未知错误".to_string())
                )),
            }
        }
    }
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}
