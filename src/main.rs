#![allow(clippy::uninlined_format_args)]

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use whisper_task_rs::{
    asr::whisper::WhisperAsr,
    audio::probe::FfprobeDurationProbe,
    config::AppConfig,
    schedule::{StatusPersister, TaskManager, TaskScheduler, TranscribeProcessor},
    storage::task::JsonFileTaskStorage,
    text::SimplifiedChineseNormalizer,
    utils::logger,
    AppContext, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::parse();
    config.validate()?;

    // 初始化日志系统
    let _guard = logger::init(config.log_dir.clone())?;
    info!("Starting whisper task service ({})...", VERSION);

    let upload_dir = config.upload_dir();
    fs::create_dir_all(&upload_dir)
        .with_context(|| format!("failed to create upload dir {}", upload_dir.display()))?;

    // 初始化 ASR 模型
    info!("Initializing Whisper ASR model from {}...", config.model_path);
    let asr = Arc::new(WhisperAsr::new(config.model_path.clone())?);

    // 恢复任务状态
    info!("Loading task status from {}...", config.status_file.display());
    let storage = Arc::new(JsonFileTaskStorage::new(&config.status_file));
    let persister = Arc::new(StatusPersister::new(
        storage,
        config.save_interval(),
        config.retention(),
    ));
    let mut task_manager = TaskManager::new();
    persister.load_into(&mut task_manager);

    // 初始化调度器
    let scheduler_config = config.scheduler_config();
    info!(
        "Initializing Scheduler ({} concurrent, {} queued)...",
        scheduler_config.max_concurrent_tasks, scheduler_config.max_queued_tasks
    );
    let processor = TranscribeProcessor::new(asr, Arc::new(SimplifiedChineseNormalizer));
    let scheduler = Arc::new(TaskScheduler::new(
        Arc::new(task_manager),
        persister,
        processor,
        scheduler_config,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = scheduler.spawn_sweeper(shutdown.clone());

    // 创建应用上下文
    let ctx = Arc::new(AppContext {
        scheduler: scheduler.clone(),
        policy: config.policy(),
        probe: Arc::new(FfprobeDurationProbe::new(config.probe_timeout())),
        upload_dir,
        max_upload_bytes: config.max_upload_bytes(),
        cors_origins: config.cors_origins.clone(),
    });

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("Starting HTTP server at http://{}", addr);

    tokio::spawn(wait_for_signal(shutdown.clone()));
    let server_shutdown = shutdown.clone();
    let result = whisper_task_rs::web::start_server(ctx, addr, async move {
        server_shutdown.cancelled().await
    })
    .await;
    if let Err(e) = &result {
        error!("Server error: {}", e);
    }

    // 优雅关闭
    info!("Shutting down...");
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Status sweeper ended abnormally: {}", e);
    }
    scheduler.shutdown().await;

    result
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
