//! Messaging-provider seam.
//!
//! Every session owns one [`ProviderAdapter`] for request/response calls and one
//! event channel on which the provider pushes lifecycle changes and inbound
//! messages. A [`ProviderFactory`] creates both together.
//!
//! ```text
//!  Gateway ──► ProviderAdapter::send_message() ──► bridge / network
//!     ▲
//!     └──── mpsc::Receiver<ProviderEvent> ◄────── bridge / network
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

mod subprocess;

pub use relaygate_provider_protocol::{
    ChatSummary, InboundMessage, MessageKind, Presence, ProviderEvent,
};
pub use subprocess::{SubprocessProvider, SubprocessProviderFactory};

/// Media downloaded from a received message.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: Bytes,
}

/// Request/response operations a session performs against the network.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Begin connecting. Progress is reported on the event channel.
    async fn initialize(&self) -> Result<(), ProviderError>;

    async fn is_registered_address(&self, address: &str) -> Result<bool, ProviderError>;

    async fn set_typing_state(&self, address: &str, presence: Presence)
    -> Result<(), ProviderError>;

    async fn clear_typing_state(&self, address: &str) -> Result<(), ProviderError>;

    /// Send a text message and return the provider-native message id.
    async fn send_message(&self, address: &str, content: &str) -> Result<String, ProviderError>;

    async fn fetch_media(&self, provider_message_id: &str) -> Result<MediaBlob, ProviderError>;

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ProviderError>;

    async fn logout(&self) -> Result<(), ProviderError>;

    async fn destroy(&self) -> Result<(), ProviderError>;
}

/// A freshly created provider connection for one session.
pub struct ProviderConnection {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub events: mpsc::Receiver<ProviderEvent>,
}

/// Creates provider connections, one per session instance.
pub trait ProviderFactory: Send + Sync {
    fn connect(
        &self,
        session_key: &str,
        instance_id: &str,
    ) -> Result<ProviderConnection, ProviderError>;
}

/// Errors from provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The bridge process could not be started.
    #[error("failed to spawn provider bridge: {0}")]
    Spawn(#[source] std::io::Error),

    /// The connection is gone (bridge exited or session torn down).
    #[error("provider connection closed")]
    ChannelClosed,

    /// No reply within the request timeout.
    #[error("provider request timed out")]
    Timeout,

    /// The provider answered with an error.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered with a payload we could not understand.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(e.to_string())
    }
}
