use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::gateway::Gateway;
use crate::handlers;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route("/sessions", post(handlers::v1::create_session))
        .route(
            "/sessions/{session_key}",
            get(handlers::v1::get_session).delete(handlers::v1::delete_session),
        )
        .route(
            "/sessions/{session_key}/pairing",
            get(handlers::v1::get_pairing),
        )
        .route(
            "/sessions/{session_key}/webhook",
            get(handlers::v1::get_webhook)
                .put(handlers::v1::put_webhook)
                .delete(handlers::v1::delete_webhook),
        )
        .route(
            "/sessions/{session_key}/messages",
            post(handlers::v1::send_message),
        )
        .route(
            "/sessions/{session_key}/pauses",
            get(handlers::v1::list_pauses)
                .post(handlers::v1::pause_address)
                .delete(handlers::v1::resume_address),
        )
        .route("/sessions/{session_key}/logs", get(handlers::v1::get_logs))
        .route("/webhooks", get(handlers::v1::list_webhooks))
        .route("/messages", get(handlers::v1::list_messages))
        .route("/messages/{message_id}", get(handlers::v1::get_message))
        .route("/insights", get(handlers::v1::all_insights))
        .route(
            "/insights/{session_key}",
            get(handlers::v1::session_insights),
        );

    let legacy = Router::new()
        .route("/start", post(handlers::legacy::start))
        .route("/qr/{user_id}", get(handlers::legacy::qr))
        .route("/status/{user_id}", get(handlers::legacy::status))
        .route("/messages/log/{user_id}", get(handlers::legacy::message_log))
        .route("/send", post(handlers::legacy::send));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
        .merge(legacy)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
