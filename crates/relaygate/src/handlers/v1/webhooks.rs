//! Webhook configuration handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::gateway::WebhookBinding;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct PutWebhookRequest {
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    session_key: String,
    url: Option<String>,
}

#[derive(Serialize)]
pub struct ListWebhooksResponse {
    webhooks: Vec<WebhookBinding>,
}

/// PUT /api/v1/sessions/{session_key}/webhook
pub async fn put_webhook(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(req): Json<PutWebhookRequest>,
) -> Response {
    match state.gateway.set_webhook(&session_key, &req.url).await {
        Ok(()) => Json(WebhookResponse {
            session_key,
            url: Some(req.url),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/sessions/{session_key}/webhook
pub async fn get_webhook(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Json<WebhookResponse> {
    let url = state.gateway.get_webhook(&session_key);
    Json(WebhookResponse { session_key, url })
}

/// DELETE /api/v1/sessions/{session_key}/webhook
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.gateway.clear_webhook(&session_key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/webhooks
pub async fn list_webhooks(State(state): State<AppState>) -> Json<ListWebhooksResponse> {
    Json(ListWebhooksResponse {
        webhooks: state.gateway.list_webhooks(),
    })
}
