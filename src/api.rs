//! HTTP routes for tool calls and job resources.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::{Value, json};

use crate::error::ArtifactError;
use crate::injection::run_id_from_headers;
use crate::jobs::JobArtifactStore;
use crate::tools::{ToolContext, ToolDispatcher};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<ToolDispatcher>,
    pub artifacts: Arc<JobArtifactStore>,
}

/// `GET /health`, `GET /tools`, `POST /tools/{name}` and
/// `GET /resources/jobs/{file}`.
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/{name}", post(call_tool_handler))
        .route("/resources/jobs/{file}", get(resource_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "tools": state.dispatcher.registry().count().await,
    }))
}

async fn list_tools_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({"tools": state.dispatcher.registry().schemas().await}))
}

async fn call_tool_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // An empty body is a call without arguments.
    let params: Value = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid JSON"),
        }
    };
    if !params.is_object() {
        return error_response(StatusCode::BAD_REQUEST, "arguments must be a JSON object");
    }

    let ctx = ToolContext::new(run_id_from_headers(&headers));
    match state.dispatcher.call(&name, params, &ctx).await {
        Some(response) => Json(response).into_response(),
        None => error_response(StatusCode::NOT_FOUND, &format!("Unknown tool: {}", name)),
    }
}

async fn resource_handler(State(state): State<ApiState>, Path(file): Path<String>) -> Response {
    match state.artifacts.read_resource(&file) {
        Ok(text) => ([(header::CONTENT_TYPE, "application/json")], text).into_response(),
        Err(e @ ArtifactError::InvalidLocator(_)) => {
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => {
            tracing::error!("Failed to read artifact {}: {}", file, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({"error": error}))).into_response()
}
