use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::schedule::TaskStatus;

/// Errors that surface to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file provided")]
    MissingFile,

    #[error("No file selected")]
    EmptyFilename,

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Invalid multipart request: {0}")]
    Multipart(String),

    #[error("Invalid value for '{field}': {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Too many tasks in flight ({active}), try again later")]
    Overloaded { active: usize },

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task {id} is already {status}")]
    TaskFinished { id: String, status: TaskStatus },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::EmptyFilename
            | ApiError::EmptyFile
            | ApiError::Multipart(_)
            | ApiError::InvalidField { .. } => StatusCode::BAD_REQUEST,
            ApiError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TaskFinished { .. } => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {:#}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
