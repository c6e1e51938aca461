pub mod asr;
pub mod audio;
pub mod config;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod text;
pub mod utils;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use audio::probe::DurationProbe;
use schedule::{SchedulingPolicy, TaskScheduler};

/// Build identifier baked in by `build.rs`.
pub const VERSION: &str = env!("GIT_HASH");

pub struct AppContext {
    pub scheduler: Arc<TaskScheduler>,
    pub policy: SchedulingPolicy,
    pub probe: Arc<dyn DurationProbe>,
    /// Where uploaded audio is spooled before transcription.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
}
