//! RFC 7807 problem details responses.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub const CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Build a problem response for `status` with a human-readable detail.
pub fn problem(status: StatusCode, detail: impl Into<String>) -> Response {
    let body = ProblemDetails {
        problem_type: "about:blank".to_string(),
        title: status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string(),
        status: status.as_u16(),
        detail: Some(detail.into()),
    };
    (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], Json(body)).into_response()
}

/// HTTP status for each gateway error.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NotFound { .. } | GatewayError::NotAvailable(_) => StatusCode::NOT_FOUND,
        GatewayError::AlreadyExists(_) | GatewayError::SessionNotReady { .. } => {
            StatusCode::CONFLICT
        }
        GatewayError::MissingParameter(_) => StatusCode::BAD_REQUEST,
        GatewayError::InvalidRecipient(_) | GatewayError::WebhookValidationFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::ProviderSendFailed(_) | GatewayError::SessionClosed(_) => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::DuplicateId(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        problem(status_for(&self), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&GatewayError::session_not_found("a")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&GatewayError::NotAvailable("pairing payload")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&GatewayError::AlreadyExists("a".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&GatewayError::SessionNotReady {
                session_key: "a".into(),
                status: "starting".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&GatewayError::MissingParameter("to")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&GatewayError::InvalidRecipient("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&GatewayError::WebhookValidationFailed("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&GatewayError::ProviderSendFailed("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&GatewayError::SessionClosed("a".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&GatewayError::DuplicateId("m".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_problem_body() {
        let response = GatewayError::session_not_found("acct1").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let problem: ProblemDetails = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem.status, 404);
        assert_eq!(problem.title, "Not Found");
        assert_eq!(problem.detail.as_deref(), Some("session 'acct1' not found"));
    }
}
