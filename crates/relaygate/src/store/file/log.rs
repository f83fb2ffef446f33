//! File-based inbound log storage.
//!
//! One pretty-printed JSON array per session at `{logs_dir}/{key}.json`.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;

use crate::session::LogEntry;
use crate::store::LogStore;
use crate::store::error::{StorageError, StorageResult};

use super::{atomic_write_file, sanitize_key};

#[derive(Clone)]
pub struct FileLogStore {
    logs_dir: PathBuf,
    /// Per-key write locks so saves for one session never interleave.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileLogStore {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    fn log_path(&self, session_key: &str) -> PathBuf {
        self.logs_dir
            .join(format!("{}.json", sanitize_key(session_key)))
    }

    fn lock_for(&self, session_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_key.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn save(&self, session_key: &str, entries: &[LogEntry]) -> StorageResult<()> {
        let lock = self.lock_for(session_key);
        let _guard = lock.lock().await;

        fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| StorageError::file_io(&self.logs_dir, e))?;

        let data = serde_json::to_vec_pretty(entries)?;
        atomic_write_file(&self.log_path(session_key), &data).await
    }

    async fn load(&self, session_key: &str) -> StorageResult<Vec<LogEntry>> {
        let path = self.log_path(session_key);
        let contents = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };
        serde_json::from_slice(&contents)
            .map_err(|e| StorageError::file_deserialization(&path, e.to_string()))
    }
}
