use std::collections::HashMap;

use anyhow::Result;

use crate::schedule::types::TaskRecord;

pub mod json;

pub use json::JsonFileTaskStorage;

/// Durable home of the task registry snapshot.
pub trait TaskStorage: Send + Sync + 'static {
    /// Returns `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<HashMap<String, TaskRecord>>>;

    /// Replaces the stored snapshot with `tasks`.
    fn save(&self, tasks: &HashMap<String, TaskRecord>) -> Result<()>;
}
