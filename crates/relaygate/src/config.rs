use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::dispatch::PacingConfig;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let config: Self = serde_saphyr::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the dispatcher cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.chars_per_second == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.chars_per_second must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.pause_min_ms > self.dispatch.pause_max_ms {
            return Err(ConfigError::Invalid(format!(
                "dispatch.pause_min_ms ({}) exceeds dispatch.pause_max_ms ({})",
                self.dispatch.pause_min_ms, self.dispatch.pause_max_ms
            )));
        }
        if self.provider.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    300
}

// ============================================================================
// DispatchConfig
// ============================================================================

/// Outbound pacing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Whether sends are humanized when the request does not say.
    #[serde(default = "default_humanized")]
    pub humanized: bool,
    #[serde(default = "default_chars_per_second")]
    pub chars_per_second: u32,
    #[serde(default = "default_max_typing_ms")]
    pub max_typing_ms: u64,
    #[serde(default = "default_pause_min_ms")]
    pub pause_min_ms: u64,
    #[serde(default = "default_pause_max_ms")]
    pub pause_max_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            humanized: default_humanized(),
            chars_per_second: default_chars_per_second(),
            max_typing_ms: default_max_typing_ms(),
            pause_min_ms: default_pause_min_ms(),
            pause_max_ms: default_pause_max_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            chars_per_second: self.chars_per_second,
            max_typing: Duration::from_millis(self.max_typing_ms),
            pause_min: Duration::from_millis(self.pause_min_ms),
            pause_max: Duration::from_millis(self.pause_max_ms),
        }
    }
}

fn default_humanized() -> bool {
    true
}

fn default_chars_per_second() -> u32 {
    16
}

fn default_max_typing_ms() -> u64 {
    15_000
}

fn default_pause_min_ms() -> u64 {
    5_000
}

fn default_pause_max_ms() -> u64 {
    8_000
}

// ============================================================================
// WebhookConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_seconds: u64,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            validation_timeout_seconds: default_validation_timeout(),
            delivery_timeout_seconds: default_delivery_timeout(),
        }
    }
}

fn default_validation_timeout() -> u64 {
    5
}

fn default_delivery_timeout() -> u64 {
    10
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding one JSON log file per session.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// Render pairing challenges as a QR code on stderr.
    #[serde(default)]
    pub print_pairing_qr: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            print_pairing_qr: false,
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from(".relaygate/logs")
}

// ============================================================================
// ProviderConfig
// ============================================================================

/// External bridge process spawned once per session.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_request_timeout_provider")]
    pub request_timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: default_provider_command(),
            args: vec!["bridge.js".to_string()],
            env: HashMap::new(),
            request_timeout_seconds: default_request_timeout_provider(),
        }
    }
}

fn default_provider_command() -> String {
    "node".to_string()
}

fn default_request_timeout_provider() -> u64 {
    30
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================
