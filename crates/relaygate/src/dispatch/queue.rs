//! Per-session outbound queue with an explicit dispatcher lifecycle.
//!
//! The queue and the dispatcher's `Idle`/`Running` state live under one lock,
//! so "append + decide whether to start a dispatcher" and "pop or go idle"
//! are each atomic. That gives at most one dispatcher per queue without
//! polling and without lost wake-ups.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;
use ulid::Ulid;

use crate::error::GatewayError;

/// Prefix for generated job ids.
pub const JOB_ID_PREFIX: &str = "job_";

pub type JobResult = Result<SendReceipt, GatewayError>;

// ============================================================================
// Jobs
// ============================================================================

/// How a send is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Simulate typing before each send.
    pub humanized: bool,
    /// Split the text into sentences sent one by one.
    pub per_sentence: bool,
    /// Show a "recording audio" presence instead of "typing".
    pub simulate_voice: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            humanized: true,
            per_sentence: false,
            simulate_voice: false,
        }
    }
}

/// What an outbound job sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text { body: String, options: SendOptions },
}

impl OutboundPayload {
    pub fn text(body: impl Into<String>, options: SendOptions) -> Self {
        OutboundPayload::Text {
            body: body.into(),
            options,
        }
    }
}

/// One message actually delivered to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentSegment {
    pub message_id: String,
    pub provider_message_id: String,
}

/// Successful outcome of a job. The ids are those of the last segment sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub job_id: String,
    pub message_id: String,
    pub provider_message_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SentSegment>,
}

pub struct OutboundJob {
    pub job_id: String,
    pub session_key: String,
    pub target_address: String,
    pub payload: OutboundPayload,
    pub enqueued_at: DateTime<Utc>,
    completion: oneshot::Sender<JobResult>,
}

impl OutboundJob {
    /// Create a job and the handle the caller waits on.
    pub fn new(
        session_key: impl Into<String>,
        target_address: impl Into<String>,
        payload: OutboundPayload,
    ) -> (Self, JobHandle) {
        let session_key = session_key.into();
        let job_id = format!("{}{}", JOB_ID_PREFIX, Ulid::new());
        let (tx, rx) = oneshot::channel();
        let job = Self {
            job_id: job_id.clone(),
            session_key: session_key.clone(),
            target_address: target_address.into(),
            payload,
            enqueued_at: Utc::now(),
            completion: tx,
        };
        let handle = JobHandle {
            job_id,
            session_key,
            rx,
        };
        (job, handle)
    }

    /// Fulfil the completion handle. Called exactly once per job.
    pub fn complete(self, result: JobResult) {
        if self.completion.send(result).is_err() {
            debug!(job_id = %self.job_id, "Job caller went away before completion");
        }
    }
}

/// Caller side of a queued job.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    session_key: String,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    /// Wait for the job to finish.
    pub async fn wait(self) -> JobResult {
        self.rx
            .await
            .unwrap_or_else(|_| Err(GatewayError::SessionClosed(self.session_key)))
    }
}

// ============================================================================
// Session queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
}

/// What the caller must do after enqueueing.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The dispatcher was idle and is now `Running`; the caller spawns it.
    StartDispatcher,
    /// A dispatcher is already draining the queue.
    Queued,
    /// The queue was closed; the job has been failed.
    Closed,
}

struct QueueInner {
    state: DispatcherState,
    pending: VecDeque<OutboundJob>,
    closed: bool,
}

/// FIFO of outbound jobs for one session instance.
pub struct SessionDispatchQueue {
    instance_id: String,
    inner: Mutex<QueueInner>,
}

impl SessionDispatchQueue {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            inner: Mutex::new(QueueInner {
                state: DispatcherState::Idle,
                pending: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Append a job at the tail.
    pub async fn enqueue(&self, job: OutboundJob) -> EnqueueOutcome {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            drop(inner);
            let session_key = job.session_key.clone();
            job.complete(Err(GatewayError::SessionClosed(session_key)));
            return EnqueueOutcome::Closed;
        }

        inner.pending.push_back(job);
        match inner.state {
            DispatcherState::Running => EnqueueOutcome::Queued,
            DispatcherState::Idle => {
                inner.state = DispatcherState::Running;
                EnqueueOutcome::StartDispatcher
            }
        }
    }

    /// Pop the head job, or go `Idle` if there is none.
    ///
    /// Only the running dispatcher calls this.
    pub async fn next_job(&self) -> Option<OutboundJob> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            inner.state = DispatcherState::Idle;
            return None;
        }
        match inner.pending.pop_front() {
            Some(job) => Some(job),
            None => {
                inner.state = DispatcherState::Idle;
                None
            }
        }
    }

    /// Close the queue and fail every pending job with `SessionClosed`.
    ///
    /// A job already taken by the dispatcher is left to finish on its own.
    pub async fn close(&self) -> usize {
        let drained: Vec<OutboundJob> = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            inner.pending.drain(..).collect()
        };
        let count = drained.len();
        for job in drained {
            let session_key = job.session_key.clone();
            job.complete(Err(GatewayError::SessionClosed(session_key)));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn state(&self) -> DispatcherState {
        self.inner.lock().await.state
    }
}

// ============================================================================
// Queue collection
// ============================================================================

/// Dispatch queues by session key, created lazily. Cheap to clone.
#[derive(Clone, Default)]
pub struct DispatchQueues {
    queues: Arc<DashMap<String, Arc<SessionDispatchQueue>>>,
}

impl DispatchQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue for a session instance, creating it on first use.
    ///
    /// A leftover queue from an earlier instance of the same key is replaced
    /// and returned as the second value so the caller can close it.
    pub fn get_or_create(
        &self,
        session_key: &str,
        instance_id: &str,
    ) -> (Arc<SessionDispatchQueue>, Option<Arc<SessionDispatchQueue>>) {
        match self.queues.entry(session_key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().instance_id() == instance_id {
                    return (slot.get().clone(), None);
                }
                let fresh = Arc::new(SessionDispatchQueue::new(instance_id));
                let stale = slot.insert(fresh.clone());
                (fresh, Some(stale))
            }
            Entry::Vacant(slot) => {
                let fresh = Arc::new(SessionDispatchQueue::new(instance_id));
                slot.insert(fresh.clone());
                (fresh, None)
            }
        }
    }

    pub fn get(&self, session_key: &str) -> Option<Arc<SessionDispatchQueue>> {
        self.queues.get(session_key).map(|q| q.clone())
    }

    /// Remove the session's queue if it belongs to `instance_id`.
    pub fn remove(&self, session_key: &str, instance_id: &str) -> Option<Arc<SessionDispatchQueue>> {
        self.queues
            .remove_if(session_key, |_, q| q.instance_id() == instance_id)
            .map(|(_, q)| q)
    }

    pub fn keys(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(n: usize) -> (OutboundJob, JobHandle) {
        OutboundJob::new(
            "acct1",
            "5511999",
            OutboundPayload::text(format!("message {n}"), SendOptions::default()),
        )
    }

    #[tokio::test]
    async fn test_first_enqueue_starts_dispatcher() {
        let queue = SessionDispatchQueue::new("inst_1");
        let (j1, _h1) = job(1);
        let (j2, _h2) = job(2);

        assert_eq!(queue.enqueue(j1).await, EnqueueOutcome::StartDispatcher);
        assert_eq!(queue.state().await, DispatcherState::Running);
        assert_eq!(queue.enqueue(j2).await, EnqueueOutcome::Queued);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_next_job_is_fifo_and_goes_idle() {
        let queue = SessionDispatchQueue::new("inst_1");
        let mut handles = Vec::new();
        for n in 0..3 {
            let (j, h) = job(n);
            handles.push(h);
            queue.enqueue(j).await;
        }

        let ids: Vec<String> = handles.iter().map(|h| h.job_id.clone()).collect();
        let mut popped = Vec::new();
        while let Some(j) = queue.next_job().await {
            popped.push(j.job_id.clone());
        }
        assert_eq!(popped, ids);
        assert_eq!(queue.state().await, DispatcherState::Idle);

        // Idle again: the next enqueue must start a new dispatcher.
        let (j, _h) = job(9);
        assert_eq!(queue.enqueue(j).await, EnqueueOutcome::StartDispatcher);
    }

    #[tokio::test]
    async fn test_close_fails_pending_jobs() {
        let queue = SessionDispatchQueue::new("inst_1");
        let (j1, h1) = job(1);
        let (j2, h2) = job(2);
        queue.enqueue(j1).await;
        queue.enqueue(j2).await;

        assert_eq!(queue.close().await, 2);
        assert_eq!(
            h1.wait().await,
            Err(GatewayError::SessionClosed("acct1".to_string()))
        );
        assert_eq!(
            h2.wait().await,
            Err(GatewayError::SessionClosed("acct1".to_string()))
        );

        let (j3, h3) = job(3);
        assert_eq!(queue.enqueue(j3).await, EnqueueOutcome::Closed);
        assert!(h3.wait().await.is_err());
        assert!(queue.next_job().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_job_resolves_session_closed() {
        let (j, h) = job(1);
        drop(j);
        assert_eq!(
            h.wait().await,
            Err(GatewayError::SessionClosed("acct1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_complete_delivers_result() {
        let (j, h) = job(1);
        let job_id = j.job_id.clone();
        j.complete(Ok(SendReceipt {
            job_id: job_id.clone(),
            message_id: "msg_1".to_string(),
            provider_message_id: "wamid-1".to_string(),
            segments: vec![],
        }));
        let receipt = h.wait().await.unwrap();
        assert_eq!(receipt.job_id, job_id);
        assert_eq!(receipt.provider_message_id, "wamid-1");
    }

    #[test]
    fn test_job_ids_prefixed() {
        let (j, h) = job(1);
        assert!(j.job_id.starts_with(JOB_ID_PREFIX));
        assert_eq!(j.job_id, h.job_id);
    }

    #[tokio::test]
    async fn test_queues_replace_stale_instance() {
        let queues = DispatchQueues::new();
        let (q1, stale) = queues.get_or_create("acct1", "inst_1");
        assert!(stale.is_none());
        let (again, _) = queues.get_or_create("acct1", "inst_1");
        assert!(Arc::ptr_eq(&q1, &again));

        let (q2, stale) = queues.get_or_create("acct1", "inst_2");
        assert!(!Arc::ptr_eq(&q1, &q2));
        assert!(Arc::ptr_eq(&stale.unwrap(), &q1));

        assert!(queues.remove("acct1", "inst_1").is_none());
        assert!(queues.remove("acct1", "inst_2").is_some());
        assert!(queues.get("acct1").is_none());
    }
}
