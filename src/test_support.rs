//! Test doubles shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use crate::asr::{AsrEngine, AsrParams, DecodeMonitor, Segment, Transcription, TranscriptionInfo};
use crate::audio::probe::DurationProbe;
use crate::schedule::processors::{ProgressSink, ProgressUpdate};
use crate::schedule::{
    SchedulerConfig, SchedulingPolicy, StatusPersister, TaskManager, TaskScheduler,
    TranscribeProcessor,
};
use crate::storage::task::JsonFileTaskStorage;
use crate::text::SimplifiedChineseNormalizer;
use crate::AppContext;

pub fn segment(start: f64, end: f64, text: &str) -> Segment {
    Segment {
        start,
        end,
        text: text.to_string(),
        words: None,
    }
}

/// Engine that replays a fixed script instead of decoding audio.
pub struct ScriptedEngine {
    language: String,
    duration: f64,
    segments: Vec<Segment>,
    transcribe_error: Option<String>,
    stream_error: Option<(usize, String)>,
    panic_message: Option<String>,
    // Each segment waits for one message when set.
    gate: Option<Mutex<Receiver<()>>>,
    requests: Mutex<Vec<AsrParams>>,
}

impl ScriptedEngine {
    pub fn new(language: &str, duration: f64, segments: Vec<Segment>) -> Self {
        Self {
            language: language.to_string(),
            duration,
            segments,
            transcribe_error: None,
            stream_error: None,
            panic_message: None,
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `count` evenly spaced segments covering `duration` seconds.
    pub fn evenly_spaced(language: &str, duration: f64, count: usize) -> Self {
        let step = duration / count as f64;
        let segments = (0..count)
            .map(|i| segment(i as f64 * step, (i + 1) as f64 * step, &format!("segment {}", i)))
            .collect();
        Self::new(language, duration, segments)
    }

    pub fn failing(message: &str) -> Self {
        let mut engine = Self::new("en", 0.0, Vec::new());
        engine.transcribe_error = Some(message.to_string());
        engine
    }

    pub fn panicking(message: &str) -> Self {
        let mut engine = Self::new("en", 0.0, Vec::new());
        engine.panic_message = Some(message.to_string());
        engine
    }

    pub fn fail_after(mut self, segments: usize, message: &str) -> Self {
        self.stream_error = Some((segments, message.to_string()));
        self
    }

    /// Makes every segment wait for a message on the returned sender.
    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(Mutex::new(rx));
        (self, tx)
    }

    pub fn requested_languages(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|params| params.language.clone())
            .collect()
    }
}

impl AsrEngine for ScriptedEngine {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn transcribe(
        &self,
        _audio_path: &Path,
        params: &AsrParams,
        monitor: &dyn DecodeMonitor,
    ) -> Result<Transcription<'_>> {
        self.requests.lock().unwrap().push(params.clone());
        if let Some(message) = &self.panic_message {
            panic!("{}", message);
        }
        if let Some(message) = &self.transcribe_error {
            return Err(anyhow!(message.clone()));
        }

        // 模拟整段解码，按四分之一上报
        for percent in [0, 25, 50, 75, 100] {
            if monitor.should_abort() {
                return Err(anyhow!("decode aborted at {}%", percent));
            }
            monitor.progress(percent);
        }

        let language = params
            .language
            .clone()
            .unwrap_or_else(|| self.language.clone());
        let (keep, stream_error) = match &self.stream_error {
            Some((after, message)) => (*after, Some(anyhow!(message.clone()))),
            None => (usize::MAX, None),
        };
        let segments = self
            .segments
            .iter()
            .cloned()
            .take(keep)
            .map(Ok)
            .chain(stream_error.map(Err))
            .inspect(move |_| {
                if let Some(gate) = &self.gate {
                    let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(10));
                }
            });

        Ok(Transcription {
            info: TranscriptionInfo {
                language,
                duration: self.duration,
            },
            segments: Box::new(segments),
        })
    }
}

/// Collects every reported progress value.
#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    pub fn values(&self) -> Vec<u8> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|update| update.progress)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, update: ProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

/// Probe returning a fixed answer.
pub struct StubProbe(pub Option<f64>);

#[async_trait]
impl DurationProbe for StubProbe {
    async fn probe(&self, _path: &Path) -> Option<f64> {
        self.0
    }
}

/// Scheduler over a scratch status file; keep the `TempDir` alive.
pub struct TestHarness {
    pub scheduler: Arc<TaskScheduler>,
    pub status_file: PathBuf,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new(engine: ScriptedEngine, config: SchedulerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let status_file = dir.path().join("status.json");
        let persister = StatusPersister::new(
            Arc::new(JsonFileTaskStorage::new(&status_file)),
            Duration::from_millis(50),
            chrono::Duration::hours(24),
        );
        let processor =
            TranscribeProcessor::new(Arc::new(engine), Arc::new(SimplifiedChineseNormalizer));
        let scheduler = TaskScheduler::new(
            Arc::new(TaskManager::new()),
            Arc::new(persister),
            processor,
            config,
        );
        Self {
            scheduler: Arc::new(scheduler),
            status_file,
            dir,
        }
    }

    pub fn upload(&self, contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile_in(self.dir.path())
            .unwrap();
        std::io::Write::write_all(&mut file, contents).unwrap();
        file
    }

    pub fn context(&self, probe: Option<f64>) -> AppContext {
        AppContext {
            scheduler: self.scheduler.clone(),
            policy: SchedulingPolicy::default(),
            probe: Arc::new(StubProbe(probe)),
            upload_dir: self.dir.path().to_path_buf(),
            max_upload_bytes: 64 * 1024 * 1024,
            cors_origins: None,
        }
    }
}

pub fn scheduler_config(max_concurrent_tasks: usize, max_queued_tasks: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_tasks,
        max_queued_tasks,
        task_timeout: None,
    }
}
