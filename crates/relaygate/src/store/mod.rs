//! Persistence for per-session inbound logs.

use async_trait::async_trait;

use crate::session::LogEntry;

mod error;
pub mod file;

pub use error::{StorageError, StorageResult};
pub use file::FileLogStore;

/// Storage for each session's received-message log.
///
/// The whole log is written on every append so a file always holds a
/// complete, parseable history.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Replace the stored log for a session.
    async fn save(&self, session_key: &str, entries: &[LogEntry]) -> StorageResult<()>;

    /// Load the stored log. A session with no stored log yields an empty list.
    async fn load(&self, session_key: &str) -> StorageResult<Vec<LogEntry>>;
}
