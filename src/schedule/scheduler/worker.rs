use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{lock, persist, Cancellations, TaskManager};
use crate::schedule::persister::{SnapshotTrigger, StatusPersister};
use crate::schedule::processors::transcribe::CANCELLED_MESSAGE;
use crate::schedule::processors::{ProgressSink, ProgressUpdate, TranscribeProcessor};
use crate::schedule::types::{TranscribeParams, TranscribeResult};

const STARTING: u8 = 5;

/// Owns one async task from acceptance to its terminal state.
pub(super) struct TaskWorker {
    pub task_id: String,
    pub task_manager: Arc<TaskManager>,
    pub persister: Arc<StatusPersister>,
    pub processor: TranscribeProcessor,
    pub permits: Arc<Semaphore>,
    pub cancellations: Cancellations,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl TaskWorker {
    pub async fn run(self, input: NamedTempFile, params: TranscribeParams) {
        match self.execute(input, params).await {
            Ok(result) => match self.task_manager.complete(&self.task_id, result) {
                Ok(record) => info!(
                    "Task {} completed: {} segments",
                    self.task_id, record.segments_processed
                ),
                Err(e) => error!("Could not record completion of task {}: {}", self.task_id, e),
            },
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Task {} failed: {}", self.task_id, message);
                if let Err(e) = self.task_manager.fail(&self.task_id, message) {
                    error!("Could not record failure of task {}: {}", self.task_id, e);
                }
            }
        }

        persist(&self.persister, &self.task_manager, SnapshotTrigger::Forced).await;
        lock(&self.cancellations).remove(&self.task_id);
    }

    async fn execute(&self, input: NamedTempFile, params: TranscribeParams) -> Result<TranscribeResult> {
        let _permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.report(ProgressUpdate::new(0, "Queued..."));
                tokio::select! {
                    permit = self.permits.clone().acquire_owned() => {
                        permit.context("worker pool is closed")?
                    }
                    _ = self.cancel.cancelled() => return Err(anyhow!(CANCELLED_MESSAGE)),
                }
            }
        };

        self.report(ProgressUpdate::new(STARTING, "Starting transcription..."));
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.timeout.map(|timeout| {
            let cancel = self.cancel.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timed_out.store(true, Ordering::SeqCst);
                cancel.cancel();
            })
        });

        let processor = self.processor.clone();
        let sink = RegistryProgress {
            task_id: self.task_id.clone(),
            task_manager: self.task_manager.clone(),
            persister: self.persister.clone(),
        };
        let cancel = self.cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = processor.process(input.path(), &params, &sink, &cancel);
            if let Err(e) = input.close() {
                warn!("Failed to remove uploaded file for task {}: {}", sink.task_id, e);
            }
            result
        })
        .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow!(
                "Transcription panicked: {}",
                panic_message(e.into_panic().as_ref())
            )),
            Err(e) => Err(anyhow!("Transcription was aborted: {}", e)),
        };

        match (result, self.timeout) {
            (Err(_), Some(timeout)) if timed_out.load(Ordering::SeqCst) => {
                Err(anyhow!("Task timed out after {:?}", timeout))
            }
            (result, _) => result,
        }
    }

    fn report(&self, update: ProgressUpdate) {
        if let Err(e) = self
            .task_manager
            .report_progress(&self.task_id, update.progress, update.text)
        {
            error!("Progress update for task {} rejected: {}", self.task_id, e);
        }
    }
}

/// Writes pipeline progress into the registry and piggybacks periodic snapshots.
struct RegistryProgress {
    task_id: String,
    task_manager: Arc<TaskManager>,
    persister: Arc<StatusPersister>,
}

impl ProgressSink for RegistryProgress {
    fn report(&self, update: ProgressUpdate) {
        let updated = self.task_manager.update(&self.task_id, |record| {
            record.progress = update.progress;
            record.progress_text = update.text;
            if let Some(count) = update.segments_processed {
                record.segments_processed = count;
            }
            if let Some(language) = update.detected_language {
                record.detected_language = Some(language);
            }
        });

        match updated {
            Ok(_) => {
                self.persister
                    .snapshot(&self.task_manager, SnapshotTrigger::Periodic);
            }
            Err(e) => error!("Progress update for task {} rejected: {}", self.task_id, e),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
