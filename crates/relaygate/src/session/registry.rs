//! Session registry.
//!
//! Owns every session value. Other components refer to sessions by key
//! and go through the registry for reads and counter updates. No entry lock
//! is ever held across an `.await`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::GatewayError;
use crate::provider::{ProviderAdapter, ProviderEvent};

use super::LogEntry;
use super::status::SessionStatus;

/// Prefix for generated instance ids.
pub const INSTANCE_ID_PREFIX: &str = "inst_";

// ============================================================================
// Types
// ============================================================================

struct Session {
    instance_id: String,
    status: SessionStatus,
    pairing_payload: Option<String>,
    webhook_url: Option<String>,
    account_address: Option<String>,
    created_at: DateTime<Utc>,
    counters: SessionCounters,
    log: Vec<LogEntry>,
    adapter: Option<Arc<dyn ProviderAdapter>>,
}

/// Per-session activity counters. Never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub sent_count: u64,
    pub received_count: u64,
    pub webhook_delivery_count: u64,
    pub api_call_count: u64,
}

/// Snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_key: String,
    pub instance_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: SessionCounters,
    #[serde(skip)]
    pub pairing_payload: Option<String>,
}

/// What the dispatcher needs from a `Ready` session.
#[derive(Clone)]
pub struct ReadySession {
    pub instance_id: String,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// Result of applying a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Transitioned {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// The session disconnected and is gone from the registry.
    Removed,
    /// Unknown session, stale instance, or invalid transition.
    Ignored,
}

// ============================================================================
// Session Registry
// ============================================================================

/// Registry of live sessions. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Register a new session in `Starting`.
    pub fn create(&self, session_key: &str) -> Result<SessionInfo, GatewayError> {
        match self.sessions.entry(session_key.to_string()) {
            Entry::Occupied(_) => Err(GatewayError::AlreadyExists(session_key.to_string())),
            Entry::Vacant(slot) => {
                let session = Session {
                    instance_id: format!("{}{}", INSTANCE_ID_PREFIX, Ulid::new()),
                    status: SessionStatus::Starting,
                    pairing_payload: None,
                    webhook_url: None,
                    account_address: None,
                    created_at: Utc::now(),
                    counters: SessionCounters::default(),
                    log: Vec::new(),
                    adapter: None,
                };
                let info = snapshot(session_key, &session);
                slot.insert(session);
                info!(session_key = %session_key, instance_id = %info.instance_id, "Session created");
                Ok(info)
            }
        }
    }

    /// Attach the provider adapter once the connection exists.
    ///
    /// Returns false when the session was removed (or replaced) meanwhile.
    pub fn attach_adapter(
        &self,
        session_key: &str,
        instance_id: &str,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> bool {
        match self.sessions.get_mut(session_key) {
            Some(mut session) if session.instance_id == instance_id => {
                session.adapter = Some(adapter);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, session_key: &str) -> Result<SessionInfo, GatewayError> {
        self.sessions
            .get(session_key)
            .map(|s| snapshot(session_key, &s))
            .ok_or_else(|| GatewayError::session_not_found(session_key))
    }

    /// Resolve a session for an API call and count the call.
    pub fn touch(&self, session_key: &str) -> Result<SessionInfo, GatewayError> {
        let mut session = self
            .sessions
            .get_mut(session_key)
            .ok_or_else(|| GatewayError::session_not_found(session_key))?;
        session.counters.api_call_count += 1;
        Ok(snapshot(session_key, &session))
    }

    pub fn contains(&self, session_key: &str, instance_id: &str) -> bool {
        self.sessions
            .get(session_key)
            .is_some_and(|s| s.instance_id == instance_id)
    }

    /// Remove a session. Absent keys are ignored.
    pub fn remove(&self, session_key: &str) -> Option<SessionInfo> {
        self.sessions
            .remove(session_key)
            .map(|(key, session)| snapshot(&key, &session))
    }

    /// Remove only if the session still belongs to `instance_id`.
    pub fn remove_instance(&self, session_key: &str, instance_id: &str) -> bool {
        self.sessions
            .remove_if(session_key, |_, s| s.instance_id == instance_id)
            .is_some()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| snapshot(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every attached adapter, e.g. for shutdown.
    pub fn adapters(&self) -> Vec<(String, Arc<dyn ProviderAdapter>)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .adapter
                    .clone()
                    .map(|adapter| (entry.key().clone(), adapter))
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    /// Apply a lifecycle event coming from the session's provider.
    pub fn apply_event(
        &self,
        session_key: &str,
        instance_id: &str,
        event: &ProviderEvent,
    ) -> EventOutcome {
        if let ProviderEvent::Disconnected { reason } = event {
            if self.remove_instance(session_key, instance_id) {
                info!(session_key = %session_key, reason = %reason, "Session disconnected");
                return EventOutcome::Removed;
            }
            debug!(session_key = %session_key, instance_id = %instance_id, "Disconnect for unknown instance");
            return EventOutcome::Ignored;
        }

        let Some(mut session) = self.sessions.get_mut(session_key) else {
            debug!(session_key = %session_key, event = event.name(), "Event for unknown session");
            return EventOutcome::Ignored;
        };
        if session.instance_id != instance_id {
            debug!(
                session_key = %session_key,
                instance_id = %instance_id,
                "Event from superseded instance ignored"
            );
            return EventOutcome::Ignored;
        }

        let from = session.status;
        let to = match from.apply(event) {
            Ok(to) => to,
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "Ignoring lifecycle event");
                return EventOutcome::Ignored;
            }
        };

        session.status = to;
        match event {
            ProviderEvent::PairingChallenge { payload } => {
                session.pairing_payload = Some(payload.clone());
            }
            ProviderEvent::Ready { account_address } => {
                session.pairing_payload = None;
                session.account_address = Some(account_address.clone());
            }
            _ => session.pairing_payload = None,
        }

        info!(session_key = %session_key, from = %from, to = %to, "Session status changed");
        EventOutcome::Transitioned { from, to }
    }

    // ------------------------------------------------------------------------
    // Queries used by the dispatcher and pipeline
    // ------------------------------------------------------------------------

    /// The adapter of a `Ready` session.
    pub fn ready(&self, session_key: &str) -> Result<ReadySession, GatewayError> {
        let session = self
            .sessions
            .get(session_key)
            .ok_or_else(|| GatewayError::session_not_found(session_key))?;
        let not_ready = || GatewayError::SessionNotReady {
            session_key: session_key.to_string(),
            status: session.status.to_string(),
        };
        if session.status != SessionStatus::Ready {
            return Err(not_ready());
        }
        let adapter = session.adapter.clone().ok_or_else(not_ready)?;
        Ok(ReadySession {
            instance_id: session.instance_id.clone(),
            adapter,
        })
    }

    /// The adapter of a session instance, whatever its status.
    pub fn adapter(
        &self,
        session_key: &str,
        instance_id: &str,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        self.sessions
            .get(session_key)
            .filter(|s| s.instance_id == instance_id)
            .and_then(|s| s.adapter.clone())
    }

    pub fn webhook_url(&self, session_key: &str) -> Option<String> {
        self.sessions
            .get(session_key)
            .and_then(|s| s.webhook_url.clone())
    }

    pub fn set_webhook_url(
        &self,
        session_key: &str,
        url: Option<String>,
    ) -> Result<(), GatewayError> {
        let mut session = self
            .sessions
            .get_mut(session_key)
            .ok_or_else(|| GatewayError::session_not_found(session_key))?;
        session.webhook_url = url;
        Ok(())
    }

    /// Every session that has a webhook, sorted by key.
    pub fn webhooks(&self) -> Vec<(String, String)> {
        let mut hooks: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .webhook_url
                    .clone()
                    .map(|url| (entry.key().clone(), url))
            })
            .collect();
        hooks.sort();
        hooks
    }

    // ------------------------------------------------------------------------
    // Counters and log
    // ------------------------------------------------------------------------

    pub fn record_sent(&self, session_key: &str, instance_id: &str) {
        self.update_counters(session_key, instance_id, |c| c.sent_count += 1);
    }

    pub fn record_received(&self, session_key: &str, instance_id: &str) {
        self.update_counters(session_key, instance_id, |c| c.received_count += 1);
    }

    pub fn record_webhook_delivery(&self, session_key: &str, instance_id: &str) {
        self.update_counters(session_key, instance_id, |c| {
            c.webhook_delivery_count += 1
        });
    }

    /// Counters belong to one instance; updates from a replaced one are dropped.
    fn update_counters(
        &self,
        session_key: &str,
        instance_id: &str,
        f: impl FnOnce(&mut SessionCounters),
    ) {
        if let Some(mut session) = self.sessions.get_mut(session_key)
            && session.instance_id == instance_id
        {
            f(&mut session.counters);
        }
    }

    /// Append to the in-memory log and return the full log for persistence.
    pub fn append_log(
        &self,
        session_key: &str,
        instance_id: &str,
        entry: LogEntry,
    ) -> Option<Vec<LogEntry>> {
        let mut session = self.sessions.get_mut(session_key)?;
        if session.instance_id != instance_id {
            return None;
        }
        session.log.push(entry);
        Some(session.log.clone())
    }

    pub fn logs(&self, session_key: &str) -> Option<Vec<LogEntry>> {
        self.sessions.get(session_key).map(|s| s.log.clone())
    }
}

fn snapshot(session_key: &str, session: &Session) -> SessionInfo {
    SessionInfo {
        session_key: session_key.to_string(),
        instance_id: session.instance_id.clone(),
        status: session.status,
        account_address: session.account_address.clone(),
        webhook_url: session.webhook_url.clone(),
        created_at: session.created_at,
        counters: session.counters,
        pairing_payload: session.pairing_payload.clone(),
    }
}
