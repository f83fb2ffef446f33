//! Webhook validation and delivery.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::WebhookConfig;
use crate::messages::MessageRecord;
use crate::provider::MessageKind;
use crate::session::MediaAttachment;

/// Event name of inbound message deliveries.
pub const EVENT_MESSAGE_RECEIVED: &str = "message.received";

/// Event name of the validation probe sent by `set_webhook`.
pub const EVENT_WEBHOOK_VALIDATION: &str = "webhook.validation";

/// Payload posted for each inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event: &'static str,
    #[serde(flatten)]
    pub record: MessageRecord,
    pub sender_name: String,
    pub body: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
}

/// Synthetic payload used to probe a webhook before accepting it.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationProbe<'a> {
    pub event: &'static str,
    pub test: bool,
    pub session_key: &'a str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered with status {status}")]
    Status { status: u16 },
}

/// Posts JSON payloads to tenant webhooks.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    validation_timeout: Duration,
    delivery_timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: Client, config: &WebhookConfig) -> Self {
        Self {
            client,
            validation_timeout: Duration::from_secs(config.validation_timeout_seconds),
            delivery_timeout: Duration::from_secs(config.delivery_timeout_seconds),
        }
    }

    /// Probe `url` with a validation payload. Only a 2xx answer passes.
    pub async fn validate(&self, session_key: &str, url: &str) -> Result<(), WebhookError> {
        let url = parse_url(url)?;
        let probe = ValidationProbe {
            event: EVENT_WEBHOOK_VALIDATION,
            test: true,
            session_key,
            timestamp: Utc::now(),
        };
        self.post(url, &probe, self.validation_timeout).await
    }

    /// Deliver one inbound event. No retries.
    pub async fn deliver(&self, url: &str, event: &WebhookEvent) -> Result<(), WebhookError> {
        let url = parse_url(url)?;
        self.post(url, event, self.delivery_timeout).await
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
        timeout: Duration,
    ) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<Url, WebhookError> {
    let url = Url::parse(raw).map_err(|e| WebhookError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(WebhookError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{other}'"
        ))),
    }
}
