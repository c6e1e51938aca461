use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Result;
use hound::{SampleFormat, WavReader};
use rayon::prelude::*;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, WindowFunction};
use tempfile::NamedTempFile;
use tracing::info;

pub mod probe;

/// whisper 需要 16kHz 单声道输入
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// 解析音频文件并转换为 whisper 可用的样本
///
/// # 处理步骤
/// 1. 非 WAV 文件先用 FFmpeg 转换为 16kHz 单声道 WAV
/// 2. 读取 WAV 文件
/// 3. 转换为单声道
/// 4. 峰值归一化
/// 5. 如果需要，重采样到16kHz
pub fn parse_audio_file(path: &Path) -> Result<Vec<f32>> {
    // 转换产生的临时文件在 guard 释放时删除
    let converted = ensure_wav_format(path)?;
    let wav_path = converted.as_ref().map(|file| file.path()).unwrap_or(path);

    let (samples, num_channels, sample_rate) = read_wav_file(wav_path)?;
    drop(converted);

    let mono_samples = convert_to_mono(&samples, num_channels);
    let normalized_samples = normalize_audio(&mono_samples);

    if sample_rate != WHISPER_SAMPLE_RATE {
        resample_audio(&normalized_samples, sample_rate)
    } else {
        Ok(normalized_samples)
    }
}

/// 确保音频文件为WAV格式
///
/// 输入不是 WAV 时用 FFmpeg 转换，返回转换后的临时文件；已经是 WAV 则返回 `None`。
/// 此函数依赖于系统中安装的FFmpeg
fn ensure_wav_format(path: &Path) -> Result<Option<NamedTempFile>> {
    let is_wav = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if is_wav {
        return Ok(None);
    }

    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let mut builder = tempfile::Builder::new();
    builder.prefix("converted-").suffix(".wav");
    let output = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    info!("Converting {} to WAV format...", path.display());
    let result = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
        .arg(path)
        .args(["-acodec", "pcm_s16le", "-ac", "1", "-ar", "16000"])
        .arg(output.path())
        .stdin(Stdio::null())
        .output()
        .map_err(|e| anyhow::anyhow!("Failed to execute ffmpeg: {}", e))?;

    if !result.status.success() {
        return Err(anyhow::anyhow!(
            "FFmpeg conversion failed with status {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        ));
    }

    Ok(Some(output))
}

/// 读取WAV文件，返回样本数据（[-1, 1] 范围）、通道数和采样率
fn read_wav_file(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
    let mut reader = WavReader::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to read WAV file: {}", e))?;

    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    let sample_rate = spec.sample_rate;
    if num_channels == 0 {
        return Err(anyhow::anyhow!("WAV file declares zero channels"));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|val| val as f32 / i16::MAX as f32))
            .collect::<std::result::Result<Vec<f32>, _>>(),
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>(),
        (format, bits) => {
            return Err(anyhow::anyhow!(
                "Unsupported WAV sample format: {:?} {} bits",
                format,
                bits
            ))
        }
    }
    .map_err(|e| anyhow::anyhow!("Failed to read samples: {}", e))?;

    info!("Original sample rate: {} Hz, {} channel(s)", sample_rate, num_channels);
    Ok((samples, num_channels, sample_rate))
}

/// 通过对每个采样的所有通道取平均值，将多声道音频转换为单声道
fn convert_to_mono(samples: &[f32], num_channels: usize) -> Vec<f32> {
    if num_channels == 1 {
        return samples.to_vec();
    }
    samples
        .par_chunks(num_channels)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

/// 将音频样本归一化到[-1, 1]范围内，静音输入保持不变
fn normalize_audio(samples: &[f32]) -> Vec<f32> {
    let max_abs = samples.par_iter().map(|&s| s.abs()).reduce(|| 0.0, f32::max);
    if max_abs <= f32::EPSILON {
        return samples.to_vec();
    }
    samples.par_iter().map(|&s| s / max_abs).collect()
}

/// 将音频重采样到16kHz采样率
fn resample_audio(samples: &[f32], original_sample_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    info!("Resampling from {} Hz to {} Hz", original_sample_rate, WHISPER_SAMPLE_RATE);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        WHISPER_SAMPLE_RATE as f64 / original_sample_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create resampler: {}", e))?;

    let mut resampled = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| anyhow::anyhow!("Resampling failed: {}", e))?;

    Ok(resampled.pop().unwrap_or_default())
}
