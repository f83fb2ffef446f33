//! relaygate - A multi-tenant messaging gateway with paced per-session dispatch.

// ============================================================================
// Always Available
// ============================================================================

pub mod build_info;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod pause;
pub mod provider;
pub mod session;
pub mod store;
pub mod webhook;

pub use error::GatewayError;
pub use gateway::Gateway;

// ============================================================================
// Server-only (behind `server` feature)
// ============================================================================

#[cfg(feature = "server")]
pub mod handlers;
#[cfg(feature = "server")]
pub mod server;
