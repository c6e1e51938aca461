pub mod transcribe;

pub use transcribe::TranscribeProcessor;

/// One progress report from a running pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub text: String,
    pub segments_processed: Option<usize>,
    pub detected_language: Option<String>,
}

impl ProgressUpdate {
    pub fn new(progress: u8, text: impl Into<String>) -> Self {
        Self {
            progress,
            text: text.into(),
            segments_processed: None,
            detected_language: None,
        }
    }

    pub fn with_segments(mut self, segments_processed: usize) -> Self {
        self.segments_processed = Some(segments_processed);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.detected_language = Some(language.into());
        self
    }
}

/// Receives progress from a pipeline running on a blocking thread.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Discards progress, used by the synchronous path.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _update: ProgressUpdate) {}
}
