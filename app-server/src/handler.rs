//! HTTP handlers for the synthesis pipeline.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use toolsmith_tool_gen::{SynthesisPipeline, ToolError, ToolPatch};
use tracing::{error, info};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SynthesisPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SynthesisPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Body of the task endpoints.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub task: Option<String>,
}

/// An error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn missing_task() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Missing task in request body")
    }
}

impl From<ToolError> for ApiError {
    fn from(e: ToolError) -> Self {
        let status = match &e {
            ToolError::NotFound(_) => StatusCode::NOT_FOUND,
            ToolError::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn task_from(payload: Result<Json<TaskRequest>, JsonRejection>) -> Result<String, ApiError> {
    let Ok(Json(request)) = payload else {
        return Err(ApiError::missing_task());
    };
    request
        .task
        .filter(|task| !task.trim().is_empty())
        .ok_or_else(ApiError::missing_task)
}

/// `POST /api/genTool`: resolve a task to a tool and its command.
pub async fn gen_tool(
    State(state): State<AppState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let task = task_from(payload)?;
    info!("genTool: {task}");
    match state.pipeline.resolve(&task).await {
        Ok(resolved) => Ok(Json(resolved).into_response()),
        Err(e) => {
            error!("genTool failed: {e}");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// `POST /api/run`: resolve and execute a task.
pub async fn run(
    State(state): State<AppState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let task = task_from(payload)?;
    info!("run: {task}");
    let outcome = state.pipeline.synthesize_or_reuse(&task).await;
    Ok(Json(outcome).into_response())
}

/// `GET /api/tools/{id}`
pub async fn get_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .pipeline
        .repository()
        .get(&id)
        .await?
        .ok_or(ToolError::NotFound(id))?;
    Ok(Json(record).into_response())
}

/// `PATCH /api/tools/{id}`
pub async fn update_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ToolPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(patch) = payload.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let updated = state.pipeline.repository().update(&id, &patch).await?;
    Ok(Json(updated).into_response())
}

/// `DELETE /api/tools/{id}`
pub async fn delete_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    if state.pipeline.repository().remove(&id).await? {
        Ok(Json(json!({ "deleted": id })).into_response())
    } else {
        Err(ToolError::NotFound(id).into())
    }
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    let tools = state.pipeline.repository().list().await?.len();
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": tools,
    }))
    .into_response())
}
