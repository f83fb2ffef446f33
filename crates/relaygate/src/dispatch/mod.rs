//! Outbound dispatch: per-session FIFO queues drained by paced dispatchers.
//!
//! ```text
//! send_text ──► SessionDispatchQueue ──► run_dispatcher ──► ProviderAdapter
//!                 (Idle | Running)        (one per queue)
//! ```

mod dispatcher;
mod pacing;
mod queue;

pub use dispatcher::{DispatchContext, run_dispatcher};
pub use pacing::{PacingConfig, inter_message_pause, split_sentences, typing_delay};
pub use queue::{
    DispatchQueues, DispatcherState, EnqueueOutcome, JOB_ID_PREFIX, JobHandle, JobResult,
    OutboundJob, OutboundPayload, SendOptions, SendReceipt, SentSegment, SessionDispatchQueue,
};
