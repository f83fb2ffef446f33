//! Plain-text routes kept for clients of the first version of the service.
//!
//! Errors still use problem details.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::server::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    message: String,
}

/// POST /start
pub async fn start(State(state): State<AppState>, Json(req): Json<StartRequest>) -> Response {
    match state.gateway.create_session(&req.user_id) {
        Ok(info) => format!("Starting session for {}.", info.session_key).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /qr/{user_id}
pub async fn qr(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.gateway.get_pairing_payload(&user_id) {
        Ok(payload) => payload.into_response(),
        Err(GatewayError::NotAvailable(_)) => "QR code not generated yet.".into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /status/{user_id}
pub async fn status(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.gateway.get_status(&user_id) {
        Ok(info) => info.status.to_string().into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /messages/log/{user_id}
pub async fn message_log(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.gateway.get_logs(&user_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /send
pub async fn send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let options = state.gateway.send_options(None, None, None);
    let handle = match state
        .gateway
        .send_text(&req.user_id, &req.to, &req.message, options)
        .await
    {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };
    match handle.wait().await {
        Ok(_) => (StatusCode::OK, "Message sent.").into_response(),
        Err(e) => e.into_response(),
    }
}
