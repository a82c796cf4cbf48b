use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use super::ServerConfig;
use super::models::{StartRequest, StartResponse, StatusResponse};
use super::sse;
use crate::broadcast::Broadcaster;
use crate::errors::{RunnerError, StartError};
use crate::job::runner::PlaybookRunner;
use crate::job::{JobController, JobStatus};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub controller: JobController,
    pub broadcaster: Arc<Broadcaster>,
    pub config: ServerConfig,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Conflict(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/playbook/{playbook}/start", post(start_playbook))
        .route("/api/output/stream", get(sse::stream_output))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(state.controller.status().into())
}

async fn start_playbook(
    State(state): State<SharedState>,
    Path(playbook): Path<String>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let runner = PlaybookRunner::new(
        &state.config.playbook_dir,
        &playbook,
        state.config.interpreter.clone(),
        request.variables.extra_vars,
    )
    .map_err(|err| match err {
        RunnerError::PlaybookNotFound { .. } => ApiError::NotFound(err.to_string()),
        RunnerError::InvalidPlaybookName { .. } => ApiError::BadRequest(err.to_string()),
        other => ApiError::Internal(other.to_string()),
    })?;

    let job_id = state
        .controller
        .start(Box::new(runner))
        .map_err(|err| match err {
            StartError::AlreadyRunning => ApiError::Conflict(err.to_string()),
        })?;

    Ok(Json(StartResponse {
        job_id,
        status: JobStatus::Running,
        message: "Playbook started successfully".to_string(),
    }))
}
