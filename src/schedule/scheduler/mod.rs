mod task_manager;
mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub use task_manager::{RegistryError, TaskManager};
use worker::TaskWorker;

use crate::error::ApiError;
use crate::schedule::persister::{SnapshotTrigger, StatusPersister};
use crate::schedule::policy::Decision;
use crate::schedule::processors::transcribe::CANCELLED_MESSAGE;
use crate::schedule::processors::{NoProgress, TranscribeProcessor};
use crate::schedule::types::{TaskRecord, TranscribeParams, TranscribeResult};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Async tasks transcribing at the same time.
    pub max_concurrent_tasks: usize,
    /// Async tasks allowed to wait for a slot on top of the running ones.
    pub max_queued_tasks: usize,
    pub task_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_queued_tasks: 64,
            task_timeout: None,
        }
    }
}

type Cancellations = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Entry point for transcription work: runs small jobs inline and hands
/// large ones to background workers that report into the task registry.
pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    persister: Arc<StatusPersister>,
    processor: TranscribeProcessor,
    permits: Arc<Semaphore>,
    // One token per live worker, removed once the worker has written its terminal state.
    cancellations: Cancellations,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(
        task_manager: Arc<TaskManager>,
        persister: Arc<StatusPersister>,
        processor: TranscribeProcessor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            task_manager,
            persister,
            processor,
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    pub fn model_name(&self) -> &str {
        self.processor.model_name()
    }

    /// Transcribes inside the caller's request. The upload is removed when done.
    pub async fn run_sync(
        &self,
        input: NamedTempFile,
        params: TranscribeParams,
    ) -> Result<TranscribeResult> {
        let processor = self.processor.clone();
        tokio::task::spawn_blocking(move || {
            let result = processor.process(input.path(), &params, &NoProgress, &CancellationToken::new());
            if let Err(e) = input.close() {
                warn!("Failed to remove uploaded file: {}", e);
            }
            result
        })
        .await
        .context("transcription thread failed")?
    }

    /// Registers an async task and starts its worker. The returned record is
    /// the state clients see on their first poll.
    pub async fn submit(
        &self,
        input: NamedTempFile,
        filename: String,
        params: TranscribeParams,
        decision: &Decision,
    ) -> Result<TaskRecord, ApiError> {
        let task_id = Uuid::new_v4().to_string();
        let mut record = TaskRecord::new(task_id.clone(), filename, &params.language);
        record.file_size_mb = Some(round2(decision.file_size_mb));
        record.estimated_minutes = Some(round2(decision.estimated_minutes));

        let cancel = CancellationToken::new();
        {
            let mut cancellations = lock(&self.cancellations);
            let live = cancellations.len();
            if live >= self.config.max_concurrent_tasks + self.config.max_queued_tasks {
                warn!("Rejecting task for {}: {} tasks in flight", record.filename, live);
                return Err(ApiError::Overloaded { active: live });
            }
            self.task_manager
                .create(record.clone())
                .map_err(|e| ApiError::Internal(e.into()))?;
            cancellations.insert(task_id.clone(), cancel.clone());
        }

        persist(&self.persister, &self.task_manager, SnapshotTrigger::Forced).await;

        let worker = TaskWorker {
            task_id: task_id.clone(),
            task_manager: self.task_manager.clone(),
            persister: self.persister.clone(),
            processor: self.processor.clone(),
            permits: self.permits.clone(),
            cancellations: self.cancellations.clone(),
            cancel,
            timeout: self.config.task_timeout,
        };
        tokio::spawn(worker.run(input, params));

        info!(
            "Task {} accepted: {} ({:.2} MB, ~{:.1} min)",
            task_id, record.filename, decision.file_size_mb, decision.estimated_minutes
        );
        Ok(record)
    }

    /// Asks a processing task to stop at its next segment boundary.
    ///
    /// A processing record without a live worker (restored from the status
    /// file) is failed directly.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskRecord, ApiError> {
        let record = self
            .task_manager
            .get(task_id)
            .ok_or_else(|| ApiError::TaskNotFound(task_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(ApiError::TaskFinished {
                id: record.id,
                status: record.status,
            });
        }

        let token = lock(&self.cancellations).get(task_id).cloned();
        if let Some(token) = token {
            token.cancel();
            info!("Cancellation requested for task {}", task_id);
            return Ok(record);
        }

        let record = self
            .task_manager
            .fail(task_id, CANCELLED_MESSAGE)
            .map_err(|e| match e {
                RegistryError::NotFound(id) => ApiError::TaskNotFound(id),
                RegistryError::Terminal { id, status } => ApiError::TaskFinished { id, status },
                other => ApiError::Internal(other.into()),
            })?;
        info!("Cancelled orphaned task {}", task_id);
        persist(&self.persister, &self.task_manager, SnapshotTrigger::Forced).await;
        Ok(record)
    }

    /// Snapshots the registry every save interval so expired tasks are
    /// evicted even while idle. Stops when `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let task_manager = self.task_manager.clone();
        let persister = self.persister.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(persister.save_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        persist(&persister, &task_manager, SnapshotTrigger::Periodic).await;
                    }
                }
            }
            info!("Status sweeper stopped");
        })
    }

    /// Writes a final snapshot.
    pub async fn shutdown(&self) {
        let live = lock(&self.cancellations).len();
        if live > 0 {
            warn!("Shutting down with {} tasks still running", live);
        }
        persist(&self.persister, &self.task_manager, SnapshotTrigger::Forced).await;
    }
}

/// Runs a snapshot on the blocking pool.
async fn persist(
    persister: &Arc<StatusPersister>,
    task_manager: &Arc<TaskManager>,
    trigger: SnapshotTrigger,
) {
    let persister = persister.clone();
    let task_manager = task_manager.clone();
    if let Err(e) =
        tokio::task::spawn_blocking(move || persister.snapshot(&task_manager, trigger)).await
    {
        warn!("Status snapshot did not run: {}", e);
    }
}

fn lock(cancellations: &Cancellations) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    cancellations.lock().unwrap_or_else(PoisonError::into_inner)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
