//! Sessions: one provider connection per tenant key.

mod registry;
mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::MessageKind;

pub use registry::{
    EventOutcome, INSTANCE_ID_PREFIX, ReadySession, SessionCounters, SessionInfo, SessionRegistry,
};
pub use status::{InvalidTransition, SessionStatus};

/// One received message in a session's inbound log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message_id: String,
    pub provider_message_id: String,
    /// Raw sender address.
    pub from: String,
    /// Resolved display name, or the raw address when unknown.
    pub sender_name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
}

/// Media embedded in a log entry or webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}
