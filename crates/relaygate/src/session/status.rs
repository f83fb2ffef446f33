//! Session lifecycle state machine.
//!
//! ```text
//! Starting ──► AwaitingPairing ──► Authenticated ──► Ready
//!    │              │  ▲  │              │
//!    │              └──┘  │              │
//!    └──────────────┴─────┴──► AuthFailed
//!
//! any ──► Disconnected (terminal, session removed)
//! ```

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::provider::ProviderEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    AwaitingPairing,
    Authenticated,
    Ready,
    AuthFailed,
    Disconnected,
}

/// A lifecycle event that is not allowed from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on '{event}'")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub event: &'static str,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::AwaitingPairing => "awaiting_pairing",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Ready => "ready",
            SessionStatus::AuthFailed => "auth_failed",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Disconnected)
    }

    /// Position on the pairing path. Failure states are off the path.
    fn rank(&self) -> Option<u8> {
        match self {
            SessionStatus::Starting => Some(0),
            SessionStatus::AwaitingPairing => Some(1),
            SessionStatus::Authenticated => Some(2),
            SessionStatus::Ready => Some(3),
            SessionStatus::AuthFailed | SessionStatus::Disconnected => None,
        }
    }

    /// Compute the status a lifecycle event moves this session to.
    ///
    /// Inbound `message` events are not lifecycle events and are rejected.
    pub fn apply(&self, event: &ProviderEvent) -> Result<SessionStatus, InvalidTransition> {
        let invalid = || InvalidTransition {
            from: *self,
            event: event.name(),
        };

        if self.is_terminal() {
            return Err(invalid());
        }

        let next = match event {
            ProviderEvent::Disconnected { .. } => return Ok(SessionStatus::Disconnected),
            ProviderEvent::AuthFailed { .. } => {
                return match self {
                    SessionStatus::Starting
                    | SessionStatus::AwaitingPairing
                    | SessionStatus::Authenticated => Ok(SessionStatus::AuthFailed),
                    _ => Err(invalid()),
                };
            }
            ProviderEvent::PairingChallenge { .. } => SessionStatus::AwaitingPairing,
            ProviderEvent::Authenticated => SessionStatus::Authenticated,
            ProviderEvent::Ready { .. } => SessionStatus::Ready,
            ProviderEvent::Message(_) => return Err(invalid()),
        };

        let (Some(from), Some(to)) = (self.rank(), next.rank()) else {
            return Err(invalid());
        };

        // Forward only; a repeated pairing challenge re-enters AwaitingPairing.
        if to > from || (to == from && next == SessionStatus::AwaitingPairing) {
            Ok(next)
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
