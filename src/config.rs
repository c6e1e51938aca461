use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;

use crate::schedule::{SchedulerConfig, SchedulingPolicy};

/// Service configuration. Every flag can also be set through the
/// environment (or a `.env` file loaded before parsing).
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Whisper transcription service with async task tracking", long_about = None)]
pub struct AppConfig {
    /// Server host
    #[arg(long, env = "WHISPER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(long, env = "WHISPER_PORT", default_value = "8178")]
    pub port: u16,

    /// Path to the ggml whisper model
    #[arg(long, env = "WHISPER_MODEL_PATH", default_value = "./models/ggml-small.bin")]
    pub model_path: String,

    /// File the task registry is snapshotted to
    #[arg(long, env = "WHISPER_STATUS_FILE", default_value = "/tmp/whisper_status.json")]
    pub status_file: PathBuf,

    /// Directory for spooled uploads, defaults to the system temp dir
    #[arg(long, env = "WHISPER_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Directory for rolling log files
    #[arg(long, env = "WHISPER_LOG_DIR", default_value = "./logs")]
    pub log_dir: String,

    /// Minimum seconds between two periodic status snapshots
    #[arg(long, env = "WHISPER_SAVE_INTERVAL_SECS", default_value = "5")]
    pub save_interval_secs: u64,

    /// Hours a task is kept after creation
    #[arg(long, env = "WHISPER_RETENTION_HOURS", default_value = "24")]
    pub retention_hours: i64,

    /// Audio longer than this many minutes is processed asynchronously
    #[arg(long, env = "WHISPER_ASYNC_DURATION_MINUTES", default_value = "10")]
    pub async_duration_minutes: f64,

    /// Files larger than this many MB are processed asynchronously when the duration is unknown
    #[arg(long, env = "WHISPER_ASYNC_FILE_SIZE_MB", default_value = "10")]
    pub async_file_size_mb: f64,

    /// Timeout for the ffprobe duration probe
    #[arg(long, env = "WHISPER_PROBE_TIMEOUT_SECS", default_value = "10")]
    pub probe_timeout_secs: u64,

    /// Async tasks allowed to transcribe at the same time, defaults to available parallelism
    #[arg(long, env = "WHISPER_MAX_CONCURRENT_TASKS")]
    pub max_concurrent_tasks: Option<usize>,

    /// Async tasks allowed to wait for a free slot before new ones are rejected
    #[arg(long, env = "WHISPER_MAX_QUEUED_TASKS", default_value = "64")]
    pub max_queued_tasks: usize,

    /// Cancel async tasks that run longer than this many seconds
    #[arg(long, env = "WHISPER_TASK_TIMEOUT_SECS")]
    pub task_timeout_secs: Option<u64>,

    /// Maximum upload size in MB
    #[arg(long, env = "WHISPER_MAX_UPLOAD_MB", default_value = "1024")]
    pub max_upload_mb: usize,

    /// Allowed CORS origins, any origin when unset
    #[arg(long, env = "WHISPER_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.save_interval_secs > 0, "save interval must be positive");
        ensure!(self.retention_hours > 0, "retention window must be positive");
        ensure!(self.probe_timeout_secs > 0, "probe timeout must be positive");
        ensure!(self.max_upload_mb > 0, "max upload size must be positive");
        ensure!(
            self.async_duration_minutes >= 0.0 && self.async_file_size_mb >= 0.0,
            "async thresholds must not be negative"
        );
        if let Some(max) = self.max_concurrent_tasks {
            ensure!(max > 0, "max concurrent tasks must be positive");
        }
        if let Some(timeout) = self.task_timeout_secs {
            ensure!(timeout > 0, "task timeout must be positive");
        }
        Ok(())
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy {
            async_duration_minutes: self.async_duration_minutes,
            async_file_size_mb: self.async_file_size_mb,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let max_concurrent_tasks = self.max_concurrent_tasks.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        SchedulerConfig {
            max_concurrent_tasks,
            max_queued_tasks: self.max_queued_tasks,
            task_timeout: self.task_timeout_secs.map(Duration::from_secs),
        }
    }
}
