use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::schedule::TaskStatus;
use crate::AppContext;

pub fn status_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/status/:task_id", get(get_status))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:task_id/cancel", post(cancel_task))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
struct TaskNotFound {
    error: &'static str,
    task_id: String,
    available_tasks: usize,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct TaskList {
    total_tasks: usize,
    tasks: BTreeMap<String, TaskStatus>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    task_id: String,
    status: TaskStatus,
    message: &'static str,
}

// Get task status endpoint
async fn get_status(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Response {
    let task_manager = ctx.scheduler.task_manager();
    match task_manager.get(&task_id) {
        Some(record) => {
            info!("Status for {}: {} ({}%)", task_id, record.status, record.progress);
            Json(record).into_response()
        }
        None => {
            let available_tasks = task_manager.len();
            warn!(
                "Task not found: {}. {} tasks available",
                task_id, available_tasks
            );
            (
                StatusCode::NOT_FOUND,
                Json(TaskNotFound {
                    error: "Task not found",
                    task_id,
                    available_tasks,
                    message: "Task may have expired or was never created",
                }),
            )
                .into_response()
        }
    }
}

// List task statuses endpoint
async fn list_tasks(State(ctx): State<Arc<AppContext>>) -> Json<TaskList> {
    let tasks = ctx.scheduler.task_manager().list();
    Json(TaskList {
        total_tasks: tasks.len(),
        tasks,
    })
}

// Cancel task endpoint
async fn cancel_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let record = ctx.scheduler.cancel(&task_id).await?;
    let message = match record.status {
        TaskStatus::Processing => "Cancellation requested",
        _ => "Task cancelled",
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            task_id: record.id,
            status: record.status,
            message,
        }),
    ))
}
