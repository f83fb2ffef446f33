//! Pause gate handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Deserialize)]
pub struct PauseRequest {
    #[serde(default)]
    address: String,
}

#[derive(Serialize)]
pub struct ListPausesResponse {
    session_key: String,
    paused: Vec<String>,
}

/// POST /api/v1/sessions/{session_key}/pauses
pub async fn pause_address(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(req): Json<PauseRequest>,
) -> Response {
    match state.gateway.pause(&session_key, &req.address) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/v1/sessions/{session_key}/pauses
pub async fn resume_address(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(req): Json<PauseRequest>,
) -> Response {
    match state.gateway.resume(&session_key, &req.address) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/sessions/{session_key}/pauses
pub async fn list_pauses(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.gateway.paused(&session_key) {
        Ok(paused) => Json(ListPausesResponse {
            session_key,
            paused,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
