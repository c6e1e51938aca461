use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppContext;

pub fn health_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub active_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub model: String,
    pub version: &'static str,
}

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: ctx.scheduler.model_name().to_string(),
        active_tasks: ctx.scheduler.task_manager().active_count(),
    })
}

pub async fn index(State(ctx): State<Arc<AppContext>>) -> Json<IndexResponse> {
    Json(IndexResponse {
        message: "Whisper.cpp compatible server",
        status: "running",
        model: ctx.scheduler.model_name().to_string(),
        version: crate::VERSION,
    })
}
