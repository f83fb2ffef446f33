//! Per-session suppression of webhook delivery by sender address.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

/// Set of paused correspondent addresses per session. Cheap to clone.
///
/// Pausing only affects whether inbound events reach the webhook. Logging and
/// counters are unaffected.
#[derive(Clone, Default)]
pub struct PauseGate {
    paused: Arc<DashMap<String, HashSet<String>>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn pause(&self, session_key: &str, address: &str) {
        self.paused
            .entry(session_key.to_string())
            .or_default()
            .insert(address.to_string());
    }

    /// Idempotent. Drops the session's set once it is empty.
    pub fn resume(&self, session_key: &str, address: &str) {
        if let Some(mut set) = self.paused.get_mut(session_key) {
            set.remove(address);
        }
        self.paused.remove_if(session_key, |_, set| set.is_empty());
    }

    pub fn is_paused(&self, session_key: &str, address: &str) -> bool {
        self.paused
            .get(session_key)
            .is_some_and(|set| set.contains(address))
    }

    /// Paused addresses for a session, sorted.
    pub fn paused(&self, session_key: &str) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .paused
            .get(session_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    pub fn clear(&self, session_key: &str) {
        self.paused.remove(session_key);
    }
}
