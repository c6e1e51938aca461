use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod whisper;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsrParams {
    /// `None` asks the engine to detect the language.
    pub language: Option<String>,
    pub word_timestamps: bool,
}

impl AsrParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_language(&mut self, language: Option<String>) -> &mut Self {
        self.language = language;
        self
    }

    pub fn set_word_timestamps(&mut self, word_timestamps: bool) -> &mut Self {
        self.word_timestamps = word_timestamps;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionInfo {
    /// Language the audio was transcribed in, either requested or detected.
    pub language: String,
    /// Audio duration in seconds.
    pub duration: f64,
}

pub type SegmentStream<'a> = Box<dyn Iterator<Item = Result<Segment>> + 'a>;

/// Output of an engine run. Segments are produced lazily, in order.
pub struct Transcription<'a> {
    pub info: TranscriptionInfo,
    pub segments: SegmentStream<'a>,
}

/// Watches a decode in flight. Engines call it on the decoding thread.
pub trait DecodeMonitor {
    /// Share of the audio decoded so far, 0..=100.
    fn progress(&self, percent: u8);

    /// Polled between decoder passes; `true` stops the decode with an error.
    fn should_abort(&self) -> bool;
}

/// Speech-to-text backend.
///
/// `transcribe` blocks for the whole decode and must be called from a
/// blocking context. Engines that decode eagerly report through `monitor`
/// before returning.
pub trait AsrEngine: Send + Sync {
    fn model_name(&self) -> &str;

    fn transcribe(
        &self,
        audio_path: &Path,
        params: &AsrParams,
        monitor: &dyn DecodeMonitor,
    ) -> Result<Transcription<'_>>;
}
