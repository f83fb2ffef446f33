//! Gateway error types.

use thiserror::Error;

/// Errors returned by gateway operations.
///
/// Per-job failures (`InvalidRecipient`, `ProviderSendFailed`, `SessionClosed`)
/// only ever surface through the job's completion handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Unknown session or message.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A session with this key is already registered.
    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    /// The session exists but is not `Ready`.
    #[error("session '{session_key}' is not ready (status: {status})")]
    SessionNotReady { session_key: String, status: String },

    /// The requested data has not been produced yet (e.g. no pairing challenge).
    #[error("{0} not available")]
    NotAvailable(&'static str),

    /// The recipient is not registered on the messaging network.
    #[error("recipient '{0}' is not registered on the network")]
    InvalidRecipient(String),

    /// The provider failed to deliver the message.
    #[error("provider send failed: {0}")]
    ProviderSendFailed(String),

    /// The webhook did not answer the validation call with a success status.
    #[error("webhook validation failed: {0}")]
    WebhookValidationFailed(String),

    /// A required field was empty or absent.
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    /// A message id was recorded twice. Indicates broken id generation.
    #[error("message id '{0}' already recorded")]
    DuplicateId(String),

    /// The session was removed while the job was still queued.
    #[error("session '{0}' was closed before the job ran")]
    SessionClosed(String),
}

impl GatewayError {
    pub fn session_not_found(session_key: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind: "session",
            id: session_key.into(),
        }
    }

    pub fn message_not_found(message_id: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind: "message",
            id: message_id.into(),
        }
    }
}

/// Reject empty (or whitespace-only) required values.
pub(crate) fn require(value: &str, name: &'static str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::MissingParameter(name));
    }
    Ok(())
}
