//! Session lifecycle handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::session::{SessionInfo, SessionStatus};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    session_key: String,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    session_key: String,
    instance_id: String,
    status: SessionStatus,
}

#[derive(Serialize)]
pub struct PairingResponse {
    session_key: String,
    payload: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    match state.gateway.create_session(&req.session_key) {
        Ok(info) => (
            StatusCode::CREATED,
            Json(CreateSessionResponse {
                session_key: info.session_key,
                instance_id: info.instance_id,
                status: info.status,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/sessions/{session_key}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Result<Json<SessionInfo>, Response> {
    state
        .gateway
        .get_status(&session_key)
        .map(Json)
        .map_err(IntoResponse::into_response)
}

/// DELETE /api/v1/sessions/{session_key}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.gateway.disconnect(&session_key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/sessions/{session_key}/pairing
pub async fn get_pairing(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.gateway.get_pairing_payload(&session_key) {
        Ok(payload) => Json(PairingResponse {
            session_key,
            payload,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
