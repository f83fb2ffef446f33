//! Global message registry.
//!
//! Every sent and received message gets a generated id and one immutable
//! [`MessageRecord`]. Records are kept for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::GatewayError;

/// Prefix for generated message ids.
pub const MESSAGE_ID_PREFIX: &str = "msg_";

/// Generate a message id from 128 random bits.
pub fn generate_message_id() -> String {
    format!("{}{:032x}", MESSAGE_ID_PREFIX, rand::random::<u128>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub session_key: String,
    pub instance_id: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub provider_message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart_address: Option<String>,
}

#[derive(Default)]
struct Inner {
    records: Vec<MessageRecord>,
    /// message_id -> position in `records`
    index: HashMap<String, usize>,
}

/// Append-only index of message records. Cheap to clone.
#[derive(Clone, Default)]
pub struct MessageRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, record: MessageRecord) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        if inner.index.contains_key(&record.message_id) {
            return Err(GatewayError::DuplicateId(record.message_id));
        }
        let position = inner.records.len();
        inner.index.insert(record.message_id.clone(), position);
        inner.records.push(record);
        Ok(())
    }

    pub async fn lookup(&self, message_id: &str) -> Result<MessageRecord, GatewayError> {
        let inner = self.inner.read().await;
        inner
            .index
            .get(message_id)
            .map(|&i| inner.records[i].clone())
            .ok_or_else(|| GatewayError::message_not_found(message_id))
    }

    /// All records in insertion order.
    pub async fn list_all(&self) -> Vec<MessageRecord> {
        self.inner.read().await.records.clone()
    }

    pub async fn list_by_session(&self, session_key: &str) -> Vec<MessageRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.session_key == session_key)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(id: &str, session_key: &str, direction: Direction) -> MessageRecord {
        MessageRecord {
            message_id: id.to_string(),
            session_key: session_key.to_string(),
            instance_id: "inst_1".to_string(),
            direction,
            timestamp: Utc::now(),
            provider_message_id: format!("wamid-{id}"),
            counterpart_address: Some("5511999@c.us".to_string()),
        }
    }

    #[test]
    fn test_generated_ids_are_unique_and_well_formed() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_message_id()).collect();
        assert_eq!(ids.len(), 10_000);
        for id in ids.iter().take(5) {
            assert!(id.starts_with(MESSAGE_ID_PREFIX));
            assert_eq!(id.len(), MESSAGE_ID_PREFIX.len() + 32);
        }
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let registry = MessageRegistry::new();
        registry
            .record(record("msg_a", "acct1", Direction::Sent))
            .await
            .unwrap();

        let found = registry.lookup("msg_a").await.unwrap();
        assert_eq!(found.direction, Direction::Sent);
        assert_eq!(found.provider_message_id, "wamid-msg_a");
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = MessageRegistry::new();
        registry
            .record(record("msg_a", "acct1", Direction::Sent))
            .await
            .unwrap();
        let err = registry
            .record(record("msg_a", "acct2", Direction::Received))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::DuplicateId("msg_a".to_string()));

        // The first record is untouched.
        assert_eq!(registry.lookup("msg_a").await.unwrap().session_key, "acct1");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let registry = MessageRegistry::new();
        assert_eq!(
            registry.lookup("msg_x").await.unwrap_err(),
            GatewayError::message_not_found("msg_x")
        );
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let registry = MessageRegistry::new();
        for (id, key) in [("msg_3", "a"), ("msg_1", "b"), ("msg_2", "a")] {
            registry
                .record(record(id, key, Direction::Received))
                .await
                .unwrap();
        }

        let ids: Vec<String> = registry
            .list_all()
            .await
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(ids, vec!["msg_3", "msg_1", "msg_2"]);

        let for_a: Vec<String> = registry
            .list_by_session("a")
            .await
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(for_a, vec!["msg_3", "msg_2"]);
    }

    #[test]
    fn test_record_serializes_direction() {
        let json = serde_json::to_value(record("msg_a", "acct1", Direction::Received)).unwrap();
        assert_eq!(json["direction"], "received");
        assert_eq!(json["counterpart_address"], "5511999@c.us");
    }
}
