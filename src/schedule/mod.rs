pub mod persister;
pub mod policy;
pub mod processors;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{
    LanguageHint, Segment, TaskRecord, TaskStatus, TranscribeParams, TranscribeResult, WordTiming,
};

pub use persister::{SnapshotTrigger, StatusPersister};
pub use policy::{Decision, ExecutionMode, SchedulingPolicy};

pub use processors::transcribe::TranscribeProcessor;
pub use processors::{ProgressSink, ProgressUpdate};

pub use scheduler::{RegistryError, SchedulerConfig, TaskManager, TaskScheduler};
