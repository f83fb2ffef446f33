//! The per-session dispatcher loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::messages::{Direction, MessageRecord, MessageRegistry, generate_message_id};
use crate::provider::{Presence, ProviderAdapter};
use crate::session::SessionRegistry;

use super::pacing::{PacingConfig, inter_message_pause, split_sentences, typing_delay};
use super::queue::{
    JobResult, OutboundJob, OutboundPayload, SendOptions, SendReceipt, SentSegment,
    SessionDispatchQueue,
};

/// Shared state every dispatcher reads and records into.
#[derive(Clone)]
pub struct DispatchContext {
    pub sessions: SessionRegistry,
    pub messages: MessageRegistry,
    pub pacing: PacingConfig,
}

/// Drain `queue` until it is empty, one job at a time.
///
/// Spawned only on the queue's `Idle -> Running` transition, so at most one
/// instance runs per queue. Job failures are reported on the job's handle
/// and never stop the loop.
pub async fn run_dispatcher(
    queue: Arc<SessionDispatchQueue>,
    adapter: Arc<dyn ProviderAdapter>,
    ctx: DispatchContext,
) {
    let instance_id = queue.instance_id().to_string();
    debug!(instance_id = %instance_id, "Dispatcher started");

    while let Some(job) = queue.next_job().await {
        let result = process_job(&job, &instance_id, adapter.as_ref(), &ctx).await;
        match &result {
            Ok(receipt) => info!(
                session_key = %job.session_key,
                job_id = %job.job_id,
                message_id = %receipt.message_id,
                segments = receipt.segments.len(),
                "Job sent"
            ),
            Err(e) => warn!(
                session_key = %job.session_key,
                job_id = %job.job_id,
                error = %e,
                "Job failed"
            ),
        }
        job.complete(result);

        tokio::time::sleep(inter_message_pause(&ctx.pacing)).await;
    }

    debug!(instance_id = %instance_id, "Dispatcher idle");
}

async fn process_job(
    job: &OutboundJob,
    instance_id: &str,
    adapter: &dyn ProviderAdapter,
    ctx: &DispatchContext,
) -> JobResult {
    let address = job.target_address.as_str();

    match adapter.is_registered_address(address).await {
        Ok(true) => {}
        Ok(false) => return Err(GatewayError::InvalidRecipient(address.to_string())),
        Err(e) => return Err(GatewayError::ProviderSendFailed(e.to_string())),
    }

    let OutboundPayload::Text { body, options } = &job.payload;
    let segments = if options.per_sentence {
        let split = split_sentences(body);
        if split.is_empty() {
            vec![body.clone()]
        } else {
            split
        }
    } else {
        vec![body.clone()]
    };

    let mut sent = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 && options.humanized {
            tokio::time::sleep(inter_message_pause(&ctx.pacing)).await;
        }
        if options.humanized {
            simulate_typing(adapter, address, segment, options, &ctx.pacing).await;
        }

        let provider_message_id = adapter
            .send_message(address, segment)
            .await
            .map_err(|e| GatewayError::ProviderSendFailed(e.to_string()))?;

        ctx.sessions.record_sent(&job.session_key, instance_id);
        let message_id = generate_message_id();
        let record = MessageRecord {
            message_id: message_id.clone(),
            session_key: job.session_key.clone(),
            instance_id: instance_id.to_string(),
            direction: Direction::Sent,
            timestamp: Utc::now(),
            provider_message_id: provider_message_id.clone(),
            counterpart_address: Some(address.to_string()),
        };
        if let Err(e) = ctx.messages.record(record).await {
            error!(error = %e, "Message id collision");
            return Err(e);
        }

        sent.push(SentSegment {
            message_id,
            provider_message_id,
        });
    }

    let Some(last) = sent.last().cloned() else {
        return Err(GatewayError::MissingParameter("message"));
    };
    Ok(SendReceipt {
        job_id: job.job_id.clone(),
        message_id: last.message_id,
        provider_message_id: last.provider_message_id,
        segments: if sent.len() > 1 { sent } else { Vec::new() },
    })
}

/// Show a presence state for the typing duration of `text`. Best effort.
async fn simulate_typing(
    adapter: &dyn ProviderAdapter,
    address: &str,
    text: &str,
    options: &SendOptions,
    pacing: &PacingConfig,
) {
    let presence = if options.simulate_voice {
        Presence::Recording
    } else {
        Presence::Composing
    };
    if let Err(e) = adapter.set_typing_state(address, presence).await {
        debug!(address = %address, error = %e, "Failed to set presence");
    }
    tokio::time::sleep(typing_delay(text, pacing)).await;
    if let Err(e) = adapter.clear_typing_state(address).await {
        debug!(address = %address, error = %e, "Failed to clear presence");
    }
}
