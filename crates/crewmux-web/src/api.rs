use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::Value;

use crewmux_protocol::{Request, Response as DaemonResponse};

use crate::ws::AppState;

/// GET /api/sessions - List all sessions.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    json_request(&state, Request::SessionList).await
}

/// GET /api/tasks - List tracked tasks.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    json_request(&state, Request::ListTasks).await
}

/// GET /api/schedules - List schedules and projects.
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    json_request(&state, Request::ListSchedules).await
}

async fn json_request(
    state: &AppState,
    req: Request,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut client = crate::client::CrewmuxClient::connect(Some(&state.socket_path))
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("server unavailable: {e}")))?;

    let resp = client
        .request(&req)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("request failed: {e}")))?;

    match resp {
        DaemonResponse::Ok { data } => Ok(Json(data.unwrap_or(Value::Array(vec![])))),
        DaemonResponse::Error { message, .. } => Err((StatusCode::INTERNAL_SERVER_ERROR, message)),
        _ => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "unexpected response".to_string(),
        )),
    }
}
