use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::schedule::{LanguageHint, TaskStatus, TranscribeParams};
use crate::AppContext;

pub fn transcribe_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/transcribe", post(transcribe))
        .route("/inference", post(transcribe))
        .layer(DefaultBodyLimit::max(ctx.max_upload_bytes))
        .with_state(ctx)
}

/// Body returned when the upload was handed to a background worker.
#[derive(Debug, Serialize)]
pub struct AsyncAccepted {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub status_url: String,
    pub estimated_time_minutes: f64,
    pub audio_duration_minutes: f64,
    pub file_size_mb: f64,
    pub language: String,
}

struct Upload {
    file: NamedTempFile,
    filename: String,
    size: u64,
}

pub async fn transcribe(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = None;
    let mut language = None;
    let mut word_timestamps = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => upload = Some(spool_upload(&ctx.upload_dir, field).await?),
            "language" => language = Some(read_text(field).await?),
            "word_timestamps" => word_timestamps = parse_flag(&read_text(field).await?)?,
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let upload = upload.ok_or(ApiError::MissingFile)?;
    if upload.size == 0 {
        return Err(ApiError::EmptyFile);
    }

    let params = TranscribeParams {
        language: LanguageHint::parse(language.as_deref()),
        word_timestamps,
    };
    let duration = ctx.probe.probe(upload.file.path()).await;
    let decision = ctx.policy.decide(upload.size, duration);
    info!(
        "Received {} ({:.2} MB, duration {:?}s, language {}), processing {:?}",
        upload.filename,
        decision.file_size_mb,
        decision.duration_seconds,
        params.language.label(),
        decision.mode
    );

    if !decision.is_async() {
        let result = ctx.scheduler.run_sync(upload.file, params).await?;
        return Ok(Json(result).into_response());
    }

    let record = ctx
        .scheduler
        .submit(upload.file, upload.filename, params, &decision)
        .await?;

    Ok(Json(AsyncAccepted {
        status_url: format!("/status/{}", record.id),
        task_id: record.id,
        status: record.status,
        progress: record.progress,
        message: format!(
            "Large file detected ({:.1} min). Processing asynchronously.",
            decision.estimated_minutes
        ),
        estimated_time_minutes: round2(decision.estimated_minutes * 0.5),
        audio_duration_minutes: round2(decision.estimated_minutes),
        file_size_mb: round2(decision.file_size_mb),
        language: record.language,
    })
    .into_response())
}

/// Streams the file field to a temp file that keeps the upload's extension,
/// so the decoder can sniff the container.
async fn spool_upload(dir: &Path, mut field: Field<'_>) -> Result<Upload, ApiError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    if filename.trim().is_empty() {
        return Err(ApiError::EmptyFilename);
    }

    let suffix = Path::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .with_context(|| format!("failed to create upload file in {}", dir.display()))?;

    let mut writer = tokio::fs::File::from_std(file.reopen().context("failed to open upload file")?);
    let mut size = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        writer
            .write_all(&chunk)
            .await
            .context("failed to write upload file")?;
        size += chunk.len() as u64;
    }
    writer.flush().await.context("failed to write upload file")?;

    debug!("Spooled {} ({} bytes) to {}", filename, size, file.path().display());
    Ok(Upload {
        file,
        filename,
        size,
    })
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))
}

fn parse_flag(raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        _ => Err(ApiError::InvalidField {
            field: "word_timestamps",
            value: raw.to_string(),
        }),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
