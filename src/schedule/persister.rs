use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::schedule::scheduler::TaskManager;
use crate::storage::task::TaskStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTrigger {
    /// Skipped when the last write is younger than the save interval.
    Periodic,
    /// Always written: task creation and terminal transitions.
    Forced,
}

/// Writes rate-limited snapshots of the task registry and reloads them at startup.
///
/// Durability is deliberately weak: progress reported between two periodic
/// snapshots is lost on a crash, creations and terminal transitions are not.
pub struct StatusPersister {
    storage: Arc<dyn TaskStorage>,
    save_interval: Duration,
    retention: chrono::Duration,
    // Held across copy and write so snapshots land in the order they were taken.
    // Lock order: this mutex, then the registry lock.
    last_save: Mutex<Option<Instant>>,
}

impl StatusPersister {
    pub fn new(
        storage: Arc<dyn TaskStorage>,
        save_interval: Duration,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            storage,
            save_interval,
            retention,
            last_save: Mutex::new(None),
        }
    }

    pub fn save_interval(&self) -> Duration {
        self.save_interval
    }

    /// Loads the persisted snapshot into a registry that is not shared yet.
    /// A missing or unreadable file leaves the registry empty.
    pub fn load_into(&self, task_manager: &mut TaskManager) -> usize {
        match self.storage.load() {
            Ok(Some(records)) => {
                let count = task_manager.restore(records);
                info!("Loaded {} tasks from status file", count);
                count
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("Failed to load status from file, starting empty: {:#}", e);
                0
            }
        }
    }

    /// Evicts expired tasks and writes the registry. Returns whether a
    /// snapshot was written; failures are logged and swallowed.
    pub fn snapshot(&self, task_manager: &TaskManager, trigger: SnapshotTrigger) -> bool {
        let mut last_save = self.last_save.lock().unwrap_or_else(PoisonError::into_inner);
        if trigger == SnapshotTrigger::Periodic {
            if let Some(at) = *last_save {
                if at.elapsed() < self.save_interval {
                    return false;
                }
            }
        }

        task_manager.evict_created_before(Utc::now() - self.retention);
        let tasks = task_manager.snapshot();

        match self.storage.save(&tasks) {
            Ok(()) => {
                *last_save = Some(Instant::now());
                true
            }
            Err(e) => {
                warn!("Failed to save status to file: {:#}", e);
                false
            }
        }
    }
}
