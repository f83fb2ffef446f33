//! Outbound send, inbound log, and message registry handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::messages::MessageRecord;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    to: String,
    #[serde(default)]
    message: String,
    humanized: Option<bool>,
    per_sentence: Option<bool>,
    simulate_voice: Option<bool>,
    /// Wait for delivery (default) or return as soon as the job is queued.
    #[serde(default = "default_wait")]
    wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Serialize)]
pub struct QueuedResponse {
    job_id: String,
}

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    session_key: Option<String>,
}

#[derive(Serialize)]
pub struct ListMessagesResponse {
    messages: Vec<MessageRecord>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/sessions/{session_key}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let options = state
        .gateway
        .send_options(req.humanized, req.per_sentence, req.simulate_voice);

    let handle = match state
        .gateway
        .send_text(&session_key, &req.to, &req.message, options)
        .await
    {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };

    if !req.wait {
        let body = QueuedResponse {
            job_id: handle.job_id.clone(),
        };
        return (StatusCode::ACCEPTED, Json(body)).into_response();
    }

    match handle.wait().await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/sessions/{session_key}/logs
pub async fn get_logs(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.gateway.get_logs(&session_key).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/messages?session_key=...
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListMessagesQuery>,
) -> Json<ListMessagesResponse> {
    Json(ListMessagesResponse {
        messages: state
            .gateway
            .list_registry(query.session_key.as_deref())
            .await,
    })
}

/// GET /api/v1/messages/{message_id}
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Response {
    match state.gateway.get_message(&message_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => e.into_response(),
    }
}
