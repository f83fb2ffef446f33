//! The gateway facade.
//!
//! [`Gateway`] owns every component of the core (session registry, dispatch
//! queues, pause gate, webhook notifier, message registry, log store) and
//! exposes the operations the HTTP layer calls. Provider events are consumed
//! by one event pump task per session (see `events`).

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{
    DispatchContext, DispatchQueues, EnqueueOutcome, JobHandle, OutboundJob, OutboundPayload,
    PacingConfig, SendOptions, run_dispatcher,
};
use crate::error::{GatewayError, require};
use crate::messages::{MessageRecord, MessageRegistry};
use crate::pause::PauseGate;
use crate::provider::{ProviderFactory, SubprocessProviderFactory};
use crate::session::{LogEntry, SessionCounters, SessionInfo, SessionRegistry, SessionStatus};
use crate::store::{FileLogStore, LogStore};
use crate::webhook::WebhookNotifier;

mod events;

/// Address suffix some networks append to user ids.
const USER_ADDRESS_SUFFIX: &str = "@c.us";

/// Strip whitespace and the user address suffix.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    trimmed
        .strip_suffix(USER_ADDRESS_SUFFIX)
        .unwrap_or(trimmed)
        .to_string()
}

// ============================================================================
// Types
// ============================================================================

/// Behaviour knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Humanized pacing when a send request does not say.
    pub default_humanized: bool,
    pub pacing: PacingConfig,
    /// Render pairing challenges as a terminal QR code.
    pub print_pairing_qr: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            default_humanized: true,
            pacing: PacingConfig::default(),
            print_pairing_qr: false,
        }
    }
}

impl GatewayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_humanized: config.dispatch.humanized,
            pacing: config.dispatch.pacing(),
            print_pairing_qr: config.sessions.print_pairing_qr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookBinding {
    pub session_key: String,
    pub url: String,
}

/// Counters plus live queue/pause state for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInsights {
    pub session_key: String,
    pub instance_id: String,
    pub status: SessionStatus,
    #[serde(flatten)]
    pub counters: SessionCounters,
    pub queued_jobs: usize,
    pub paused_addresses: usize,
}

/// Insights across every session.
#[derive(Debug, Clone, Serialize)]
pub struct InsightsSummary {
    pub sessions: Vec<SessionInsights>,
    pub totals: SessionCounters,
    pub registered_messages: usize,
}

// ============================================================================
// Gateway
// ============================================================================

struct GatewayInner {
    sessions: SessionRegistry,
    queues: DispatchQueues,
    pause: PauseGate,
    notifier: WebhookNotifier,
    messages: MessageRegistry,
    log_store: Arc<dyn LogStore>,
    factory: Arc<dyn ProviderFactory>,
    options: GatewayOptions,
    shutdown: CancellationToken,
}

/// Multi-tenant messaging gateway. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        log_store: Arc<dyn LogStore>,
        notifier: WebhookNotifier,
        options: GatewayOptions,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                sessions: SessionRegistry::new(),
                queues: DispatchQueues::new(),
                pause: PauseGate::new(),
                notifier,
                messages: MessageRegistry::new(),
                log_store,
                factory,
                options,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build a gateway with the subprocess provider and file log store.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        Self::new(
            Arc::new(SubprocessProviderFactory::new(config.provider.clone())),
            Arc::new(FileLogStore::new(config.sessions.logs_dir.clone())),
            WebhookNotifier::new(client, &config.webhook),
            GatewayOptions::from_config(config),
        )
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn messages(&self) -> &MessageRegistry {
        &self.inner.messages
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    /// Resolve per-request send flags against the configured defaults.
    pub fn send_options(
        &self,
        humanized: Option<bool>,
        per_sentence: Option<bool>,
        simulate_voice: Option<bool>,
    ) -> SendOptions {
        SendOptions {
            humanized: humanized.unwrap_or(self.inner.options.default_humanized),
            per_sentence: per_sentence.unwrap_or(false),
            simulate_voice: simulate_voice.unwrap_or(false),
        }
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Register a session and start its provider in the background.
    ///
    /// Returns as soon as the session is registered in `Starting`. Progress is
    /// visible through `get_status` as lifecycle events arrive.
    pub fn create_session(&self, session_key: &str) -> Result<SessionInfo, GatewayError> {
        require(session_key, "session_key")?;
        let info = self.inner.sessions.create(session_key)?;

        let gateway = self.clone();
        let key = info.session_key.clone();
        let instance_id = info.instance_id.clone();
        tokio::spawn(async move {
            gateway.start_provider(key, instance_id).await;
        });

        Ok(info)
    }

    async fn start_provider(&self, session_key: String, instance_id: String) {
        let connection = match self.inner.factory.connect(&session_key, &instance_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "Provider failed to start");
                if self.inner.sessions.remove_instance(&session_key, &instance_id) {
                    self.teardown(&session_key, &instance_id).await;
                }
                return;
            }
        };

        let adapter = connection.adapter;
        if !self
            .inner
            .sessions
            .attach_adapter(&session_key, &instance_id, adapter.clone())
        {
            debug!(session_key = %session_key, "Session removed before provider attached");
            if let Err(e) = adapter.destroy().await {
                debug!(session_key = %session_key, error = %e, "Destroy of detached provider failed");
            }
            return;
        }

        let pump = events::run_event_pump(
            self.clone(),
            session_key.clone(),
            instance_id.clone(),
            connection.events,
        );
        tokio::spawn(pump);

        if let Err(e) = adapter.initialize().await {
            warn!(session_key = %session_key, error = %e, "Provider initialization failed");
            if self.inner.sessions.remove_instance(&session_key, &instance_id) {
                self.teardown(&session_key, &instance_id).await;
            }
            if let Err(e) = adapter.destroy().await {
                debug!(session_key = %session_key, error = %e, "Destroy after initialization error failed");
            }
        }
    }

    pub fn get_status(&self, session_key: &str) -> Result<SessionInfo, GatewayError> {
        self.inner.sessions.touch(session_key)
    }

    pub fn get_pairing_payload(&self, session_key: &str) -> Result<String, GatewayError> {
        self.inner
            .sessions
            .touch(session_key)?
            .pairing_payload
            .ok_or(GatewayError::NotAvailable("pairing payload"))
    }

    /// Log out and tear down a session.
    ///
    /// The session is gone from the registry before the provider is told to
    /// log out, so status queries see `NotFound` immediately.
    pub async fn disconnect(&self, session_key: &str) -> Result<(), GatewayError> {
        let info = self.inner.sessions.touch(session_key)?;
        let adapter = self
            .inner
            .sessions
            .adapter(session_key, &info.instance_id);

        if !self
            .inner
            .sessions
            .remove_instance(session_key, &info.instance_id)
        {
            return Err(GatewayError::session_not_found(session_key));
        }
        self.teardown(session_key, &info.instance_id).await;

        if let Some(adapter) = adapter {
            if let Err(e) = adapter.logout().await {
                debug!(session_key = %session_key, error = %e, "Logout failed");
            }
            if let Err(e) = adapter.destroy().await {
                debug!(session_key = %session_key, error = %e, "Destroy failed");
            }
        }

        info!(session_key = %session_key, "Session disconnected by request");
        Ok(())
    }

    /// Release per-session state after the session left the registry.
    async fn teardown(&self, session_key: &str, instance_id: &str) {
        if let Some(queue) = self.inner.queues.remove(session_key, instance_id) {
            let failed = queue.close().await;
            if failed > 0 {
                info!(session_key = %session_key, failed, "Queued jobs closed with session");
            }
        }
        self.inner.pause.clear(session_key);
    }

    // ------------------------------------------------------------------------
    // Webhooks
    // ------------------------------------------------------------------------

    /// Validate `url` and, on success, make it the session's webhook.
    pub async fn set_webhook(&self, session_key: &str, url: &str) -> Result<(), GatewayError> {
        require(url, "url")?;
        self.inner.sessions.touch(session_key)?;

        self.inner
            .notifier
            .validate(session_key, url)
            .await
            .map_err(|e| GatewayError::WebhookValidationFailed(e.to_string()))?;

        self.inner
            .sessions
            .set_webhook_url(session_key, Some(url.to_string()))?;
        info!(session_key = %session_key, url = %url, "Webhook configured");
        Ok(())
    }

    /// The session's webhook, or `None` for unknown sessions.
    pub fn get_webhook(&self, session_key: &str) -> Option<String> {
        self.inner
            .sessions
            .touch(session_key)
            .ok()
            .and_then(|info| info.webhook_url)
    }

    pub fn clear_webhook(&self, session_key: &str) -> Result<(), GatewayError> {
        self.inner.sessions.touch(session_key)?;
        self.inner.sessions.set_webhook_url(session_key, None)
    }

    pub fn list_webhooks(&self) -> Vec<WebhookBinding> {
        self.inner
            .sessions
            .webhooks()
            .into_iter()
            .map(|(session_key, url)| WebhookBinding { session_key, url })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Queue a text message. The returned handle resolves when it was sent.
    pub async fn send_text(
        &self,
        session_key: &str,
        to: &str,
        message: &str,
        options: SendOptions,
    ) -> Result<JobHandle, GatewayError> {
        require(to, "to")?;
        require(message, "message")?;
        self.inner.sessions.touch(session_key)?;
        let ready = self.inner.sessions.ready(session_key)?;

        let (job, handle) = OutboundJob::new(
            session_key,
            normalize_address(to),
            OutboundPayload::text(message, options),
        );
        debug!(session_key = %session_key, job_id = %job.job_id, "Job queued");

        let (queue, stale) = self
            .inner
            .queues
            .get_or_create(session_key, &ready.instance_id);
        if let Some(stale) = stale {
            stale.close().await;
        }

        if queue.enqueue(job).await == EnqueueOutcome::StartDispatcher {
            let ctx = DispatchContext {
                sessions: self.inner.sessions.clone(),
                messages: self.inner.messages.clone(),
                pacing: self.inner.options.pacing,
            };
            tokio::spawn(run_dispatcher(queue.clone(), ready.adapter, ctx));
        }

        // The session may have been removed while we were enqueueing.
        if !self
            .inner
            .sessions
            .contains(session_key, &ready.instance_id)
            && let Some(queue) = self.inner.queues.remove(session_key, &ready.instance_id)
        {
            queue.close().await;
        }

        Ok(handle)
    }

    // ------------------------------------------------------------------------
    // Pause gate
    // ------------------------------------------------------------------------

    pub fn pause(&self, session_key: &str, address: &str) -> Result<(), GatewayError> {
        require(address, "address")?;
        self.inner.sessions.touch(session_key)?;
        self.inner
            .pause
            .pause(session_key, &normalize_address(address));
        Ok(())
    }

    pub fn resume(&self, session_key: &str, address: &str) -> Result<(), GatewayError> {
        require(address, "address")?;
        self.inner.sessions.touch(session_key)?;
        self.inner
            .pause
            .resume(session_key, &normalize_address(address));
        Ok(())
    }

    pub fn paused(&self, session_key: &str) -> Result<Vec<String>, GatewayError> {
        self.inner.sessions.touch(session_key)?;
        Ok(self.inner.pause.paused(session_key))
    }

    pub fn is_paused(&self, session_key: &str, address: &str) -> bool {
        self.inner
            .pause
            .is_paused(session_key, &normalize_address(address))
    }

    // ------------------------------------------------------------------------
    // Logs, registry, insights
    // ------------------------------------------------------------------------

    /// Received-message log, oldest first.
    ///
    /// A live session answers with its own in-memory log, even when empty.
    /// Only a key with no live session is served from the log store.
    pub async fn get_logs(&self, session_key: &str) -> Result<Vec<LogEntry>, GatewayError> {
        if self.inner.sessions.touch(session_key).is_ok() {
            return Ok(self.inner.sessions.logs(session_key).unwrap_or_default());
        }

        let stored = match self.inner.log_store.load(session_key).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "Failed to load stored log");
                Vec::new()
            }
        };
        if stored.is_empty() {
            return Err(GatewayError::NotFound {
                kind: "message log",
                id: session_key.to_string(),
            });
        }
        Ok(stored)
    }

    pub async fn get_message(&self, message_id: &str) -> Result<MessageRecord, GatewayError> {
        self.inner.messages.lookup(message_id).await
    }

    /// Every registered message, optionally only those of one session key.
    pub async fn list_registry(&self, session_key: Option<&str>) -> Vec<MessageRecord> {
        match session_key {
            Some(key) => self.inner.messages.list_by_session(key).await,
            None => self.inner.messages.list_all().await,
        }
    }

    pub async fn get_insights(&self, session_key: &str) -> Result<SessionInsights, GatewayError> {
        let info = self.inner.sessions.touch(session_key)?;
        Ok(self.insights_for(info).await)
    }

    pub async fn all_insights(&self) -> InsightsSummary {
        let mut sessions = Vec::new();
        let mut totals = SessionCounters::default();
        for info in self.inner.sessions.list() {
            totals.sent_count += info.counters.sent_count;
            totals.received_count += info.counters.received_count;
            totals.webhook_delivery_count += info.counters.webhook_delivery_count;
            totals.api_call_count += info.counters.api_call_count;
            sessions.push(self.insights_for(info).await);
        }
        InsightsSummary {
            sessions,
            totals,
            registered_messages: self.inner.messages.len().await,
        }
    }

    async fn insights_for(&self, info: SessionInfo) -> SessionInsights {
        let queued_jobs = match self.inner.queues.get(&info.session_key) {
            Some(queue) if queue.instance_id() == info.instance_id => queue.len().await,
            _ => 0,
        };
        SessionInsights {
            paused_addresses: self.inner.pause.paused(&info.session_key).len(),
            session_key: info.session_key,
            instance_id: info.instance_id,
            status: info.status,
            counters: info.counters,
            queued_jobs,
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop every event pump, fail queued jobs, and destroy every provider.
    pub async fn shutdown(&self) {
        info!(sessions = self.inner.sessions.len(), "Shutting down gateway");
        self.inner.shutdown.cancel();

        for key in self.inner.queues.keys() {
            if let Some(queue) = self.inner.queues.get(&key) {
                queue.close().await;
            }
        }

        let adapters = self.inner.sessions.adapters();
        let destroys = adapters.iter().map(|(key, adapter)| async move {
            if let Err(e) = adapter.destroy().await {
                debug!(session_key = %key, error = %e, "Destroy failed during shutdown");
            }
        });
        join_all(destroys).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("5511999@c.us"), "5511999");
        assert_eq!(normalize_address(" 5511999 "), "5511999");
        assert_eq!(normalize_address("120363@g.us"), "120363@g.us");
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.dispatch.humanized = false;
        config.sessions.print_pairing_qr = true;
        let options = GatewayOptions::from_config(&config);
        assert!(!options.default_humanized);
        assert!(options.print_pairing_qr);
        assert_eq!(options.pacing.chars_per_second, 16);
    }
}
