use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asr::AsrParams;
pub use crate::asr::{Segment, WordTiming};
use crate::text::is_chinese;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language requested by the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LanguageHint {
    #[default]
    Auto,
    /// `zh-cn`: transcribe as Chinese and force simplified script.
    SimplifiedChinese,
    Code(String),
}

impl LanguageHint {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return LanguageHint::Auto;
        };
        match raw.to_ascii_lowercase().as_str() {
            "auto" => LanguageHint::Auto,
            "zh-cn" => LanguageHint::SimplifiedChinese,
            _ => LanguageHint::Code(raw.to_string()),
        }
    }

    /// Language passed to the engine, `None` for auto-detection.
    pub fn engine_language(&self) -> Option<&str> {
        match self {
            LanguageHint::Auto => None,
            LanguageHint::SimplifiedChinese => Some("zh"),
            LanguageHint::Code(code) => Some(code.as_str()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            LanguageHint::Auto => "auto",
            LanguageHint::SimplifiedChinese => "zh-cn",
            LanguageHint::Code(code) => code.as_str(),
        }
    }

    pub fn requests_chinese(&self) -> bool {
        match self {
            LanguageHint::Auto => false,
            LanguageHint::SimplifiedChinese => true,
            LanguageHint::Code(code) => is_chinese(code),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeParams {
    pub language: LanguageHint,
    pub word_timestamps: bool,
}

impl TranscribeParams {
    pub fn to_asr_params(&self) -> AsrParams {
        let mut params = AsrParams::new();
        params
            .set_language(self.language.engine_language().map(str::to_string))
            .set_word_timestamps(self.word_timestamps);
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
    pub duration: f64,
    pub segment_count: usize,
}

/// Status of one async task as seen by pollers and the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub progress_text: String,
    pub filename: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscribeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    /// Language the client asked for, recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specified_language: Option<String>,
    /// Characters in the final text, recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_text_length: Option<usize>,
    #[serde(default)]
    pub segments_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<f64>,
}

impl TaskRecord {
    pub const INITIAL_PROGRESS: u8 = 1;

    pub fn new(id: String, filename: String, language: &LanguageHint) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskStatus::Processing,
            progress: Self::INITIAL_PROGRESS,
            progress_text: "Initializing...".to_string(),
            filename,
            language: language.label().to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_at: None,
            result: None,
            error: None,
            detected_language: None,
            specified_language: None,
            total_text_length: None,
            segments_processed: 0,
            file_size_mb: None,
            estimated_minutes: None,
        }
    }
}
