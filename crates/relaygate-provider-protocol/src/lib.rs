//! Provider bridge protocol types for relaygate.
//!
//! A bridge is an external process that holds the real connection to the
//! messaging network for exactly one session. relaygate spawns it, writes
//! [`ProviderCommand`]s to its stdin and reads [`BridgeLine`]s from its stdout.
//!
//! # Protocol Overview
//!
//! JSON Lines (newline-delimited JSON) over stdio:
//!
//! - **Commands** (relaygate → bridge): requests such as send, presence, lookups
//! - **Events** (bridge → relaygate): lifecycle changes and inbound messages
//! - **Replies** (bridge → relaygate): the answer to a command, matched by `request_id`
//!
//! # Example: Minimal Bridge Loop
//!
//! ```ignore
//! use relaygate_provider_protocol::{ProviderCommand, ProviderEvent, ProviderReply};
//!
//! let command: ProviderCommand = serde_json::from_str(&read_line_from_stdin())?;
//! if let ProviderCommand::SendMessage { request_id, address, content } = command {
//!     let id = network.send(&address, &content)?;
//!     let reply = ProviderReply::ok(request_id, serde_json::json!({ "message_id": id }));
//!     println!("{}", serde_json::to_string(&reply)?);
//! }
//!
//! let event = ProviderEvent::Ready { account_address: "5511999@c.us".into() };
//! println!("{}", serde_json::to_string(&event)?);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Commands (relaygate → bridge)
// ============================================================================

/// Commands sent from relaygate to a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderCommand {
    /// Start connecting to the network. Progress is reported through events.
    Initialize,

    /// Ask whether an address belongs to a registered account.
    IsRegistered { request_id: String, address: String },

    /// Show a presence indicator (typing, recording) in a chat.
    SetPresence {
        request_id: String,
        address: String,
        presence: Presence,
    },

    /// Clear any presence indicator in a chat.
    ClearPresence { request_id: String, address: String },

    /// Send a text message.
    SendMessage {
        request_id: String,
        address: String,
        content: String,
    },

    /// Download the media attached to a received message.
    FetchMedia {
        request_id: String,
        message_id: String,
    },

    /// List known chats with their display names.
    ListChats { request_id: String },

    /// Log the account out and forget stored credentials.
    Logout { request_id: String },

    /// Tear down the connection. The bridge exits afterwards.
    Destroy,
}

impl ProviderCommand {
    /// The request id a reply must carry, if this command expects one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ProviderCommand::IsRegistered { request_id, .. }
            | ProviderCommand::SetPresence { request_id, .. }
            | ProviderCommand::ClearPresence { request_id, .. }
            | ProviderCommand::SendMessage { request_id, .. }
            | ProviderCommand::FetchMedia { request_id, .. }
            | ProviderCommand::ListChats { request_id }
            | ProviderCommand::Logout { request_id } => Some(request_id),
            ProviderCommand::Initialize | ProviderCommand::Destroy => None,
        }
    }
}

/// Presence state shown to the correspondent while a message is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// "typing..."
    Composing,
    /// "recording audio..."
    Recording,
}

// ============================================================================
// Events (bridge → relaygate)
// ============================================================================

/// Lifecycle and inbound events pushed by a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// The network wants the user to pair a device (e.g. scan a QR code).
    PairingChallenge { payload: String },

    /// Credentials were accepted.
    Authenticated,

    /// The connection is fully usable.
    Ready { account_address: String },

    /// Credentials were rejected.
    AuthFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The connection is gone for good.
    Disconnected { reason: String },

    /// A message arrived from a correspondent.
    Message(Box<InboundMessage>),
}

impl ProviderEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::PairingChallenge { .. } => "pairing_challenge",
            ProviderEvent::Authenticated => "authenticated",
            ProviderEvent::Ready { .. } => "ready",
            ProviderEvent::AuthFailed { .. } => "auth_failed",
            ProviderEvent::Disconnected { .. } => "disconnected",
            ProviderEvent::Message(_) => "message",
        }
    }
}

/// Data for an inbound message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Identifier the network assigned to this message.
    pub provider_message_id: String,
    /// Address of the correspondent who sent it.
    pub sender: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub has_media: bool,
    /// Timestamp reported by the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Kind of an inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    #[serde(alias = "chat")]
    Text,
    /// Push-to-talk voice note.
    #[serde(alias = "ptt")]
    Voice,
    Audio,
    Image,
    Video,
    Document,
    Sticker,
    #[serde(other)]
    Other,
}

impl MessageKind {
    /// Whether this kind carries a voice recording.
    pub fn is_voice(&self) -> bool {
        matches!(self, MessageKind::Voice | MessageKind::Audio)
    }
}

// ============================================================================
// Replies (bridge → relaygate)
// ============================================================================

/// Reply to a command carrying a `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderReply {
    /// Command succeeded. `result` shape depends on the command.
    Response {
        request_id: String,
        #[serde(default)]
        result: serde_json::Value,
    },

    /// Command failed.
    Error { request_id: String, message: String },
}

impl ProviderReply {
    pub fn ok(request_id: impl Into<String>, result: serde_json::Value) -> Self {
        ProviderReply::Response {
            request_id: request_id.into(),
            result,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderReply::Error {
            request_id: request_id.into(),
            message: message.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            ProviderReply::Response { request_id, .. } | ProviderReply::Error { request_id, .. } => {
                request_id
            }
        }
    }
}

/// One line read from a bridge's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeLine {
    Reply(ProviderReply),
    Event(ProviderEvent),
}

// ============================================================================
// Reply payloads
// ============================================================================

/// `result` of an `is_registered` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredResult {
    pub registered: bool,
}

/// `result` of a `send_message` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentResult {
    pub message_id: String,
}

/// `result` of a `fetch_media` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaResult {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// One entry of a `list_chats` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = ProviderCommand::SendMessage {
            request_id: "req_001".to_string(),
            address: "5511999@c.us".to_string(),
            content: "Hello!".to_string(),
        };

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""type":"send_message""#));
        assert_eq!(cmd.request_id(), Some("req_001"));
        assert_eq!(ProviderCommand::Destroy.request_id(), None);
    }

    #[test]
    fn test_presence_serialization() {
        let cmd = ProviderCommand::SetPresence {
            request_id: "r".to_string(),
            address: "a".to_string(),
            presence: Presence::Recording,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""presence":"recording""#));
    }

    #[test]
    fn test_bridge_line_reply() {
        let line = r#"{"type":"response","request_id":"req_1","result":{"message_id":"ABC"}}"#;
        let parsed: BridgeLine = serde_json::from_str(line).unwrap();
        match parsed {
            BridgeLine::Reply(reply) => {
                assert_eq!(reply.request_id(), "req_1");
            }
            BridgeLine::Event(_) => panic!("expected reply"),
        }
    }

    #[test]
    fn test_bridge_line_error_reply() {
        let line = r#"{"type":"error","request_id":"req_2","message":"boom"}"#;
        let parsed: BridgeLine = serde_json::from_str(line).unwrap();
        assert_eq!(parsed, BridgeLine::Reply(ProviderReply::error("req_2", "boom")));
    }

    #[test]
    fn test_bridge_line_lifecycle_event() {
        let line = r#"{"type":"pairing_challenge","payload":"2@abc"}"#;
        let parsed: BridgeLine = serde_json::from_str(line).unwrap();
        assert_eq!(
            parsed,
            BridgeLine::Event(ProviderEvent::PairingChallenge {
                payload: "2@abc".to_string()
            })
        );

        let parsed: BridgeLine = serde_json::from_str(r#"{"type":"authenticated"}"#).unwrap();
        assert_eq!(parsed, BridgeLine::Event(ProviderEvent::Authenticated));
    }

    #[test]
    fn test_inbound_message_defaults_and_aliases() {
        let line = r#"{"type":"message","provider_message_id":"m1","sender":"5511@c.us","body":"oi","kind":"ptt","has_media":true}"#;
        let parsed: ProviderEvent = serde_json::from_str(line).unwrap();
        let ProviderEvent::Message(msg) = parsed else {
            panic!("expected message");
        };
        assert_eq!(msg.kind, MessageKind::Voice);
        assert!(msg.kind.is_voice());
        assert!(msg.has_media);

        let line = r#"{"type":"message","provider_message_id":"m2","sender":"x","kind":"chat"}"#;
        let ProviderEvent::Message(msg) = serde_json::from_str(line).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.body, "");
        assert!(!msg.has_media);
    }

    #[test]
    fn test_unknown_kind_maps_to_other() {
        let kind: MessageKind = serde_json::from_str(r#""location""#).unwrap();
        assert_eq!(kind, MessageKind::Other);
        assert!(!kind.is_voice());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ProviderEvent::Authenticated.name(), "authenticated");
        assert_eq!(
            ProviderEvent::Disconnected {
                reason: "LOGOUT".to_string()
            }
            .name(),
            "disconnected"
        );
    }
}
