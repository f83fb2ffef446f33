//! Common test utilities: a scripted provider and gateway builders.
#![cfg(feature = "server")]
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use tokio::sync::mpsc;

use relaygate::Gateway;
use relaygate::config::WebhookConfig;
use relaygate::dispatch::PacingConfig;
use relaygate::gateway::GatewayOptions;
use relaygate::provider::{
    ChatSummary, MediaBlob, Presence, ProviderAdapter, ProviderConnection, ProviderError,
    ProviderEvent, ProviderFactory,
};
use relaygate::server::{self, AppState};
use relaygate::session::SessionStatus;
use relaygate::store::FileLogStore;
use relaygate::webhook::WebhookNotifier;

// ============================================================================
// Scripted provider
// ============================================================================

/// One `send_message` call seen by the fake provider.
#[derive(Debug, Clone)]
pub struct SentCall {
    pub session_key: String,
    pub address: String,
    pub content: String,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
struct FakeState {
    sent: Mutex<Vec<SentCall>>,
    presence: Mutex<Vec<(String, Option<Presence>)>>,
    unregistered: Mutex<HashSet<String>>,
    chats: Mutex<Vec<ChatSummary>>,
    media: Mutex<Option<MediaBlob>>,
    events: Mutex<HashMap<String, mpsc::Sender<ProviderEvent>>>,
    fail_sends: AtomicBool,
    fail_connect: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    destroyed: AtomicUsize,
    send_delay_ms: AtomicUsize,
}

/// Provider double. Every address is registered unless marked otherwise.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentCall> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn presence_calls(&self) -> Vec<(String, Option<Presence>)> {
        self.state.presence.lock().unwrap().clone()
    }

    pub fn mark_unregistered(&self, address: &str) {
        self.state
            .unregistered
            .lock()
            .unwrap()
            .insert(address.to_string());
    }

    pub fn add_chat(&self, id: &str, display_name: &str) {
        self.state.chats.lock().unwrap().push(ChatSummary {
            id: id.to_string(),
            display_name: Some(display_name.to_string()),
        });
    }

    pub fn set_media(&self, mime_type: &str, data: &'static [u8]) {
        *self.state.media.lock().unwrap() = Some(MediaBlob {
            mime_type: mime_type.to_string(),
            data: Bytes::from_static(data),
        });
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every send take this long, to widen overlap windows.
    pub fn send_delay(&self, delay: Duration) {
        self.state
            .send_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn max_concurrent_sends(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    /// Push an event on a session's channel, waiting for the provider to connect.
    pub async fn emit(&self, session_key: &str, event: ProviderEvent) {
        for _ in 0..200 {
            let tx = self.state.events.lock().unwrap().get(session_key).cloned();
            if let Some(tx) = tx {
                tx.send(event).await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("provider for '{session_key}' never connected");
    }
}

impl ProviderFactory for FakeProvider {
    fn connect(
        &self,
        session_key: &str,
        _instance_id: &str,
    ) -> Result<ProviderConnection, ProviderError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(ProviderError::Spawn(std::io::Error::other("no bridge")));
        }
        let (tx, rx) = mpsc::channel(32);
        self.state
            .events
            .lock()
            .unwrap()
            .insert(session_key.to_string(), tx);
        Ok(ProviderConnection {
            adapter: Arc::new(FakeAdapter {
                session_key: session_key.to_string(),
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct FakeAdapter {
    session_key: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn is_registered_address(&self, address: &str) -> Result<bool, ProviderError> {
        Ok(!self.state.unregistered.lock().unwrap().contains(address))
    }

    async fn set_typing_state(
        &self,
        address: &str,
        presence: Presence,
    ) -> Result<(), ProviderError> {
        self.state
            .presence
            .lock()
            .unwrap()
            .push((address.to_string(), Some(presence)));
        Ok(())
    }

    async fn clear_typing_state(&self, address: &str) -> Result<(), ProviderError> {
        self.state
            .presence
            .lock()
            .unwrap()
            .push((address.to_string(), None));
        Ok(())
    }

    async fn send_message(&self, address: &str, content: &str) -> Result<String, ProviderError> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.state.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("send refused".to_string()));
        }
        let mut sent = self.state.sent.lock().unwrap();
        sent.push(SentCall {
            session_key: self.session_key.clone(),
            address: address.to_string(),
            content: content.to_string(),
            at: tokio::time::Instant::now(),
        });
        Ok(format!("wamid-{}", sent.len()))
    }

    async fn fetch_media(&self, _provider_message_id: &str) -> Result<MediaBlob, ProviderError> {
        self.state
            .media
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::Rejected("no media".to_string()))
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ProviderError> {
        Ok(self.state.chats.lock().unwrap().clone())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Pacing with no waits at all.
pub fn instant_pacing() -> PacingConfig {
    PacingConfig {
        chars_per_second: 16,
        max_typing: Duration::ZERO,
        pause_min: Duration::ZERO,
        pause_max: Duration::ZERO,
    }
}

pub fn test_gateway_with(provider: &FakeProvider, options: GatewayOptions) -> Gateway {
    let tmp = tempfile::TempDir::new().unwrap();
    // Leak the TempDir so it outlives the gateway.
    let tmp = Box::leak(Box::new(tmp));

    let notifier = WebhookNotifier::new(
        reqwest::Client::new(),
        &WebhookConfig {
            validation_timeout_seconds: 1,
            delivery_timeout_seconds: 1,
        },
    );
    Gateway::new(
        Arc::new(provider.clone()),
        Arc::new(FileLogStore::new(tmp.path().join("logs"))),
        notifier,
        options,
    )
}

/// Gateway over `provider` with instant pacing.
pub fn test_gateway(provider: &FakeProvider) -> Gateway {
    test_gateway_with(
        provider,
        GatewayOptions {
            default_humanized: true,
            pacing: instant_pacing(),
            print_pairing_qr: false,
        },
    )
}

pub fn test_app(gateway: &Gateway) -> Router {
    server::build_app(
        AppState {
            gateway: gateway.clone(),
        },
        30,
    )
}

/// Poll until the session reaches `status`, without counting API calls.
pub async fn wait_for_status(gateway: &Gateway, session_key: &str, status: SessionStatus) {
    for _ in 0..200 {
        if let Ok(info) = gateway.sessions().get(session_key)
            && info.status == status
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session '{session_key}' never reached {status}");
}

/// Poll until the session is gone from the registry.
pub async fn wait_for_removal(gateway: &Gateway, session_key: &str) {
    for _ in 0..200 {
        if gateway.sessions().get(session_key).is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session '{session_key}' was never removed");
}

/// Create a session and drive it to `Ready`.
pub async fn ready_session(gateway: &Gateway, provider: &FakeProvider, session_key: &str) {
    gateway.create_session(session_key).unwrap();
    provider
        .emit(
            session_key,
            ProviderEvent::Ready {
                account_address: format!("{session_key}@c.us"),
            },
        )
        .await;
    wait_for_status(gateway, session_key, SessionStatus::Ready).await;
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

// ============================================================================
// Webhook receiver
// ============================================================================

/// Local HTTP endpoint that records every JSON body posted to `/hook`.
#[derive(Clone, Default)]
pub struct WebhookReceiver {
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl WebhookReceiver {
    /// Start on an ephemeral port and return the hook URL.
    pub async fn start() -> (Self, String) {
        let receiver = Self::default();
        let bodies = receiver.bodies.clone();
        let router = Router::new().route(
            "/hook",
            axum::routing::post(move |axum::Json(body): axum::Json<serde_json::Value>| {
                let bodies = bodies.clone();
                async move {
                    bodies.lock().unwrap().push(body);
                    axum::http::StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (receiver, format!("http://{addr}/hook"))
    }

    /// Bodies of one event type, in arrival order.
    pub fn events(&self, event: &str) -> Vec<serde_json::Value> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .filter(|body| body["event"] == event)
            .cloned()
            .collect()
    }
}
