use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::schedule::types::{TaskRecord, TaskStatus, TranscribeResult};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {0} already exists")]
    AlreadyExists(String),

    #[error("task {id} is already {status}")]
    Terminal { id: String, status: TaskStatus },
}

/// Registry of task records: the single source of truth while the process runs.
///
/// One lock covers the whole map. Every critical section is O(1) except
/// `snapshot`, which clones the map so serialization can happen outside the lock.
#[derive(Debug, Default)]
pub struct TaskManager {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges records loaded at startup. Takes `&mut self`, so it can only
    /// run before the registry is shared.
    pub fn restore(&mut self, records: HashMap<String, TaskRecord>) -> usize {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        let count = records.len();
        tasks.extend(records);
        count
    }

    pub fn create(&self, record: TaskRecord) -> Result<(), RegistryError> {
        let mut tasks = self.write();
        if tasks.contains_key(&record.id) {
            return Err(RegistryError::AlreadyExists(record.id));
        }
        info!("Creating new task: {}", record.id);
        tasks.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.read().get(task_id).cloned()
    }

    /// Applies `mutate` to a processing record as one read-modify-write.
    ///
    /// Terminal records are never touched again. While the record stays
    /// processing its progress cannot go backwards, and `id` cannot change.
    pub fn update<F>(&self, task_id: &str, mutate: F) -> Result<TaskRecord, RegistryError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut tasks = self.write();
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(RegistryError::Terminal {
                id: task_id.to_string(),
                status: record.status,
            });
        }

        let mut next = record.clone();
        mutate(&mut next);
        next.id = task_id.to_string();
        if next.status == TaskStatus::Processing {
            next.progress = next.progress.max(record.progress);
        }
        next.progress = next.progress.min(100);
        next.updated_at = Utc::now();
        *record = next;
        Ok(record.clone())
    }

    pub fn report_progress(
        &self,
        task_id: &str,
        progress: u8,
        text: impl Into<String>,
    ) -> Result<u8, RegistryError> {
        let text = text.into();
        self.update(task_id, |record| {
            record.progress = progress;
            record.progress_text = text;
        })
        .map(|record| record.progress)
    }

    pub fn complete(&self, task_id: &str, result: TranscribeResult) -> Result<TaskRecord, RegistryError> {
        self.update(task_id, |record| {
            record.status = TaskStatus::Completed;
            record.progress = 100;
            record.progress_text = "Completed successfully".to_string();
            record.completed_at = Some(Utc::now());
            record.segments_processed = result.segment_count;
            record.detected_language = Some(result.language.clone());
            record.specified_language = Some(record.language.clone());
            record.total_text_length = Some(result.text.chars().count());
            record.result = Some(result);
        })
    }

    pub fn fail(&self, task_id: &str, message: impl Into<String>) -> Result<TaskRecord, RegistryError> {
        let message = message.into();
        self.update(task_id, |record| {
            record.status = TaskStatus::Error;
            record.progress_text = format!("Error: {}", message);
            record.error_at = Some(Utc::now());
            record.error = Some(message);
        })
    }

    /// Id → status label, without result payloads.
    pub fn list(&self) -> BTreeMap<String, TaskStatus> {
        self.read()
            .iter()
            .map(|(id, record)| (id.clone(), record.status))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records still processing.
    pub fn active_count(&self) -> usize {
        self.read()
            .values()
            .filter(|record| record.status == TaskStatus::Processing)
            .count()
    }

    /// Removes every record created before `cutoff`, returning the evicted ids.
    pub fn evict_created_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut tasks = self.write();
        let expired: Vec<String> = tasks
            .iter()
            .filter(|(_, record)| record.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in &expired {
            tasks.remove(task_id);
            info!("Cleaned up expired task: {}", task_id);
        }
        expired
    }

    pub fn snapshot(&self) -> HashMap<String, TaskRecord> {
        self.read().clone()
    }

    // `update` mutates a copy and publishes it only after the closure returns,
    // so a poisoned lock still guards consistent records.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
