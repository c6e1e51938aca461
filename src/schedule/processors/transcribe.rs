use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ProgressSink, ProgressUpdate};
use crate::asr::{AsrEngine, DecodeMonitor, Segment};
use crate::schedule::types::{TranscribeParams, TranscribeResult};
use crate::text::{is_chinese, normalize_or_original, ScriptNormalizer};

pub const CANCELLED_MESSAGE: &str = "Task cancelled";

// 各阶段保留的进度区间
const TRANSCRIBING: u8 = 15;
const SEGMENTS_START: u8 = 30;
const SEGMENTS_END: u8 = 70;
const NORMALIZE_END: u8 = 85;

/// Runs one transcription: engine call, segment consumption, script
/// normalization and result assembly. Blocking; call it from a blocking thread.
#[derive(Clone)]
pub struct TranscribeProcessor {
    asr: Arc<dyn AsrEngine>,
    normalizer: Arc<dyn ScriptNormalizer>,
}

impl TranscribeProcessor {
    pub fn new(asr: Arc<dyn AsrEngine>, normalizer: Arc<dyn ScriptNormalizer>) -> Self {
        Self { asr, normalizer }
    }

    pub fn model_name(&self) -> &str {
        self.asr.model_name()
    }

    pub fn process(
        &self,
        input: &Path,
        params: &TranscribeParams,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TranscribeResult> {
        info!(
            "Processing audio file: {} (language: {})",
            input.display(),
            params.language.label()
        );

        progress.report(ProgressUpdate::new(TRANSCRIBING, "Transcribing audio..."));
        let monitor = DecodeProgress::new(progress, cancel);
        let transcription = match self.asr.transcribe(input, &params.to_asr_params(), &monitor) {
            Ok(transcription) => transcription,
            Err(e) => {
                check_cancelled(cancel)?;
                return Err(e);
            }
        };
        let info = transcription.info;
        check_cancelled(cancel)?;

        progress.report(
            ProgressUpdate::new(SEGMENTS_START, "Processing segments...")
                .with_language(info.language.clone()),
        );

        // The stream length is unknown up front, so progress follows audio time.
        let mut segments: Vec<Segment> = Vec::new();
        let mut checkpoints = Checkpoints::new(SEGMENTS_START, SEGMENTS_END);
        for segment in transcription.segments {
            check_cancelled(cancel)?;
            let mut segment = segment?;
            segment.text = segment.text.trim().to_string();
            let position = if info.duration > 0.0 {
                segment.end / info.duration
            } else {
                0.0
            };
            segments.push(segment);

            if let Some(value) = checkpoints.reach(position) {
                progress.report(
                    ProgressUpdate::new(value, format!("Processed {} segments...", segments.len()))
                        .with_segments(segments.len()),
                );
            }
        }
        debug!("Engine produced {} segments", segments.len());

        let mut text = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        progress.report(
            ProgressUpdate::new(SEGMENTS_END, "Formatting results...").with_segments(segments.len()),
        );

        if params.language.requests_chinese() || is_chinese(&info.language) {
            text = normalize_or_original(self.normalizer.as_ref(), &text);

            let total = segments.len();
            let mut checkpoints = Checkpoints::new(SEGMENTS_END, NORMALIZE_END);
            for (index, segment) in segments.iter_mut().enumerate() {
                check_cancelled(cancel)?;
                segment.text = normalize_or_original(self.normalizer.as_ref(), &segment.text);
                if let Some(value) = checkpoints.reach((index + 1) as f64 / total as f64) {
                    progress.report(ProgressUpdate::new(value, "Normalizing text..."));
                }
            }
        }

        progress.report(ProgressUpdate::new(NORMALIZE_END, "Assembling result..."));

        let segment_count = segments.len();
        info!(
            "Transcription finished: {} segments, language {}, {:.1}s of audio",
            segment_count, info.language, info.duration
        );
        Ok(TranscribeResult {
            text,
            segments,
            language: info.language,
            duration: info.duration,
            segment_count,
        })
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        bail!(CANCELLED_MESSAGE);
    }
    Ok(())
}

/// Relays decoder progress into the transcribing range and stops the decode
/// once the task is cancelled.
struct DecodeProgress<'a> {
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    checkpoints: RefCell<Checkpoints>,
}

impl<'a> DecodeProgress<'a> {
    fn new(sink: &'a dyn ProgressSink, cancel: &'a CancellationToken) -> Self {
        Self {
            sink,
            cancel,
            checkpoints: RefCell::new(Checkpoints::new(TRANSCRIBING, SEGMENTS_START)),
        }
    }
}

impl DecodeMonitor for DecodeProgress<'_> {
    fn progress(&self, percent: u8) {
        let reached = self
            .checkpoints
            .borrow_mut()
            .reach(f64::from(percent) / 100.0);
        if let Some(value) = reached {
            self.sink.report(ProgressUpdate::new(
                value,
                format!("Transcribing audio... {}%", percent.min(100)),
            ));
        }
    }

    fn should_abort(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Maps a completed fraction onto `start..=end`, yielding a value only when
/// a new tenth of the range is crossed.
struct Checkpoints {
    start: u8,
    end: u8,
    next_step: u32,
}

impl Checkpoints {
    const STEPS: u32 = 10;

    fn new(start: u8, end: u8) -> Self {
        Self {
            start,
            end,
            next_step: 1,
        }
    }

    fn reach(&mut self, fraction: f64) -> Option<u8> {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let step = ((fraction * Self::STEPS as f64).floor() as u32).min(Self::STEPS);
        if step < self.next_step {
            return None;
        }
        self.next_step = step + 1;

        let span = f64::from(self.end - self.start);
        let offset = (span * f64::from(step) / f64::from(Self::STEPS)).round() as u8;
        Some(self.start + offset)
    }
}
