use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use crate::gateway::InsightsSummary;
use crate::server::AppState;

/// GET /api/v1/insights
pub async fn all_insights(State(state): State<AppState>) -> Json<InsightsSummary> {
    Json(state.gateway.all_insights().await)
}

/// GET /api/v1/insights/{session_key}
pub async fn session_insights(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.gateway.get_insights(&session_key).await {
        Ok(insights) => Json(insights).into_response(),
        Err(e) => e.into_response(),
    }
}
