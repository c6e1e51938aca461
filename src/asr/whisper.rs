use std::ffi::{c_int, c_void};
use std::path::Path;

use anyhow::{bail, Result};
use tracing::{info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
    WhisperSysContext, WhisperSysState,
};

use crate::asr::{
    AsrEngine, AsrParams, DecodeMonitor, Segment, Transcription, TranscriptionInfo, WordTiming,
};
use crate::audio::{parse_audio_file, WHISPER_SAMPLE_RATE};

pub struct WhisperAsr {
    whisper_ctx: WhisperContext,
    model_name: String,
}

impl WhisperAsr {
    pub fn new(model_path: String) -> Result<Self> {
        match WhisperContext::new_with_params(&model_path, WhisperContextParameters::default()) {
            Ok(whisper_ctx) => {
                let model_name = Path::new(&model_path)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| model_path.clone());
                Ok(Self { whisper_ctx, model_name })
            }
            Err(e) => Err(anyhow::anyhow!("failed to open whisper model {}: {}", model_path, e)),
        }
    }

    fn build_params<'a>(&self, ap: &'a AsrParams) -> FullParams<'a, 'a> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        // 未指定语言时由模型自动检测
        params.set_language(Some(ap.language.as_deref().unwrap_or("auto")));

        // 词级时间戳需要 token 时间戳
        params.set_token_timestamps(ap.word_timestamps);

        // 设置采样温度。较低的值会使输出更加确定，较高的值会增加随机性
        params.set_temperature(0.3);

        // 设置使用的线程数
        let threads = std::thread::available_parallelism()
            .map(|n| n.get().min(8))
            .unwrap_or(4);
        params.set_n_threads(threads as i32);

        // 禁用翻译功能
        params.set_translate(false);

        // 进度由任务状态上报，不在终端打印
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        // 启用上下文可以提高长音频的识别准确度
        params.set_no_context(false);
        params.set_single_segment(false);

        // 抑制空白和非语音标记
        params.set_suppress_blank(true);
        params.set_suppress_non_speech_tokens(true);

        params
    }
}

impl AsrEngine for WhisperAsr {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn transcribe(
        &self,
        audio_path: &Path,
        params: &AsrParams,
        monitor: &dyn DecodeMonitor,
    ) -> Result<Transcription<'_>> {
        let audio = parse_audio_file(audio_path)?;
        let duration = audio.len() as f64 / WHISPER_SAMPLE_RATE as f64;

        let mut state = self.whisper_ctx.create_state()?;
        let mut full_params = self.build_params(params);

        // user data 指向栈上的 monitor 引用，state.full 返回前一直有效
        let monitor_ref: &dyn DecodeMonitor = monitor;
        let user_data = &monitor_ref as *const &dyn DecodeMonitor as *mut c_void;
        unsafe {
            full_params.set_progress_callback(Some(report_decode_progress));
            full_params.set_progress_callback_user_data(user_data);
            full_params.set_abort_callback(Some(abort_decode));
            full_params.set_abort_callback_user_data(user_data);
        }

        if let Err(e) = state.full(full_params, &audio) {
            if monitor_ref.should_abort() {
                warn!("Whisper decode of {} aborted", audio_path.display());
                bail!("whisper decode aborted");
            }
            return Err(e.into());
        }
        monitor_ref.progress(100);

        let language = match &params.language {
            Some(language) => language.clone(),
            None => {
                let lang_id = state.full_lang_id_from_state()?;
                whisper_rs::get_lang_str(lang_id)
                    .unwrap_or("unknown")
                    .to_string()
            }
        };
        let count = state.full_n_segments()?;
        info!(
            "Whisper decoded {} segments from {} ({:.1}s, language {})",
            count,
            audio_path.display(),
            duration,
            language
        );

        Ok(Transcription {
            info: TranscriptionInfo { language, duration },
            segments: Box::new(WhisperSegments {
                state,
                next: 0,
                count,
                word_timestamps: params.word_timestamps,
            }),
        })
    }
}

unsafe extern "C" fn report_decode_progress(
    _ctx: *mut WhisperSysContext,
    _state: *mut WhisperSysState,
    progress: c_int,
    user_data: *mut c_void,
) {
    let monitor = &*(user_data as *const &dyn DecodeMonitor);
    monitor.progress(progress.clamp(0, 100) as u8);
}

unsafe extern "C" fn abort_decode(user_data: *mut c_void) -> bool {
    let monitor = &*(user_data as *const &dyn DecodeMonitor);
    monitor.should_abort()
}

/// Reads decoded segments out of a finished whisper state one at a time.
struct WhisperSegments<'a> {
    state: WhisperState<'a>,
    next: i32,
    count: i32,
    word_timestamps: bool,
}

impl WhisperSegments<'_> {
    fn segment(&self, index: i32) -> Result<Segment> {
        let text = self.state.full_get_segment_text(index)?;
        // whisper 的时间戳单位是 10ms
        let start = self.state.full_get_segment_t0(index)? as f64 / 100.0;
        let end = self.state.full_get_segment_t1(index)? as f64 / 100.0;
        let words = if self.word_timestamps {
            Some(self.words(index)?)
        } else {
            None
        };

        Ok(Segment { start, end, text, words })
    }

    fn words(&self, index: i32) -> Result<Vec<WordTiming>> {
        let n_tokens = self.state.full_n_tokens(index)?;
        let mut words = Vec::new();

        for token in 0..n_tokens {
            // 多字节字符可能被拆到多个 token，无法单独解码的 token 跳过
            let Ok(text) = self.state.full_get_token_text(index, token) else {
                continue;
            };
            if text.starts_with("[_") || text.starts_with("<|") {
                continue;
            }
            let data = self.state.full_get_token_data(index, token)?;
            words.push(WordTiming {
                word: text,
                start: data.t0 as f64 / 100.0,
                end: data.t1 as f64 / 100.0,
                probability: data.p,
            });
        }

        Ok(words)
    }
}

impl Iterator for WhisperSegments<'_> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.segment(index))
    }
}
