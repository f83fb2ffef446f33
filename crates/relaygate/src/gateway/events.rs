//! Per-session event pump and the inbound message pipeline.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use qrcode::QrCode;
use qrcode::render::unicode;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::messages::{Direction, MessageRecord, generate_message_id};
use crate::provider::{InboundMessage, ProviderAdapter, ProviderEvent};
use crate::session::{EventOutcome, LogEntry, MediaAttachment};
use crate::webhook::{EVENT_MESSAGE_RECEIVED, WebhookEvent};

use super::Gateway;

/// Consume one session instance's provider events until it disconnects.
pub(super) async fn run_event_pump(
    gateway: Gateway,
    session_key: String,
    instance_id: String,
    mut events: mpsc::Receiver<ProviderEvent>,
) {
    let shutdown = gateway.inner.shutdown.clone();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        // A closed channel means the provider is gone.
        let event = event.unwrap_or_else(|| ProviderEvent::Disconnected {
            reason: "provider channel closed".to_string(),
        });

        match event {
            ProviderEvent::Message(message) => {
                handle_inbound(&gateway, &session_key, &instance_id, *message).await;
            }
            lifecycle => {
                let disconnected = matches!(lifecycle, ProviderEvent::Disconnected { .. });
                handle_lifecycle(&gateway, &session_key, &instance_id, &lifecycle).await;
                if disconnected {
                    break;
                }
            }
        }
    }
    debug!(session_key = %session_key, instance_id = %instance_id, "Event pump stopped");
}

async fn handle_lifecycle(
    gateway: &Gateway,
    session_key: &str,
    instance_id: &str,
    event: &ProviderEvent,
) {
    let adapter = gateway.inner.sessions.adapter(session_key, instance_id);

    match gateway
        .inner
        .sessions
        .apply_event(session_key, instance_id, event)
    {
        EventOutcome::Removed => {
            gateway.teardown(session_key, instance_id).await;
            if let Some(adapter) = adapter
                && let Err(e) = adapter.destroy().await
            {
                debug!(session_key = %session_key, error = %e, "Destroy after disconnect failed");
            }
        }
        EventOutcome::Transitioned { .. } => {
            if let ProviderEvent::PairingChallenge { payload } = event
                && gateway.inner.options.print_pairing_qr
            {
                print_pairing_qr(session_key, payload);
            }
        }
        EventOutcome::Ignored => {}
    }
}

fn print_pairing_qr(session_key: &str, payload: &str) {
    match QrCode::new(payload.as_bytes()) {
        Ok(code) => {
            let rendered = code
                .render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Light)
                .light_color(unicode::Dense1x2::Dark)
                .build();
            eprintln!("Pairing code for session '{session_key}':\n{rendered}");
        }
        Err(e) => warn!(session_key = %session_key, error = %e, "Failed to render pairing QR"),
    }
}

// ============================================================================
// Inbound pipeline
// ============================================================================

/// Record, log, and (unless paused) forward one inbound message.
///
/// Never fails: every step that talks to the provider or the outside world
/// degrades to a log line.
async fn handle_inbound(
    gateway: &Gateway,
    session_key: &str,
    instance_id: &str,
    message: InboundMessage,
) {
    let inner = &gateway.inner;
    let Some(adapter) = inner.sessions.adapter(session_key, instance_id) else {
        debug!(session_key = %session_key, "Inbound message for a removed session");
        return;
    };
    inner.sessions.record_received(session_key, instance_id);

    let sender_name = resolve_sender_name(adapter.as_ref(), &message.sender).await;
    let media = if message.has_media && message.kind.is_voice() {
        fetch_voice_media(adapter.as_ref(), session_key, &message.provider_message_id).await
    } else {
        None
    };

    let record = MessageRecord {
        message_id: generate_message_id(),
        session_key: session_key.to_string(),
        instance_id: instance_id.to_string(),
        direction: Direction::Received,
        timestamp: message.timestamp.unwrap_or_else(Utc::now),
        provider_message_id: message.provider_message_id.clone(),
        counterpart_address: Some(message.sender.clone()),
    };
    if let Err(e) = inner.messages.record(record.clone()).await {
        error!(session_key = %session_key, error = %e, "Message id collision");
    }

    let entry = LogEntry {
        message_id: record.message_id.clone(),
        provider_message_id: record.provider_message_id.clone(),
        from: message.sender.clone(),
        sender_name: sender_name.clone(),
        body: message.body.clone(),
        kind: message.kind,
        timestamp: record.timestamp,
        media: media.clone(),
    };
    if let Some(log) = inner.sessions.append_log(session_key, instance_id, entry)
        && let Err(e) = inner.log_store.save(session_key, &log).await
    {
        warn!(session_key = %session_key, error = %e, "Failed to persist inbound log");
    }

    info!(
        session_key = %session_key,
        message_id = %record.message_id,
        from = %message.sender,
        "Message received"
    );

    if gateway.is_paused(session_key, &message.sender) {
        debug!(session_key = %session_key, from = %message.sender, "Sender paused, webhook skipped");
        return;
    }
    let Some(url) = inner.sessions.webhook_url(session_key) else {
        return;
    };

    let event = WebhookEvent {
        event: EVENT_MESSAGE_RECEIVED,
        record,
        sender_name,
        body: message.body,
        kind: message.kind,
        media,
    };
    let notifier = inner.notifier.clone();
    let sessions = inner.sessions.clone();
    let key = session_key.to_string();
    let instance_id = instance_id.to_string();
    tokio::spawn(async move {
        match notifier.deliver(&url, &event).await {
            Ok(()) => sessions.record_webhook_delivery(&key, &instance_id),
            Err(e) => warn!(session_key = %key, url = %url, error = %e, "Webhook delivery failed"),
        }
    });
}

/// Display name from the chat list, falling back to the raw address.
async fn resolve_sender_name(adapter: &dyn ProviderAdapter, sender: &str) -> String {
    match adapter.list_chats().await {
        Ok(chats) => chats
            .into_iter()
            .find(|chat| chat.id == sender)
            .and_then(|chat| chat.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| sender.to_string()),
        Err(e) => {
            debug!(sender = %sender, error = %e, "Chat lookup failed");
            sender.to_string()
        }
    }
}

async fn fetch_voice_media(
    adapter: &dyn ProviderAdapter,
    session_key: &str,
    provider_message_id: &str,
) -> Option<MediaAttachment> {
    match adapter.fetch_media(provider_message_id).await {
        Ok(blob) => Some(MediaAttachment {
            mime_type: blob.mime_type,
            data: BASE64.encode(&blob.data),
        }),
        Err(e) => {
            warn!(
                session_key = %session_key,
                provider_message_id = %provider_message_id,
                error = %e,
                "Failed to fetch voice media"
            );
            None
        }
    }
}
