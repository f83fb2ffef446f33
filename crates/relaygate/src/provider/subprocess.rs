//! Subprocess provider bridge.
//!
//! Spawns the configured bridge command once per session and speaks the
//! JSON Lines protocol from `relaygate-provider-protocol` over its stdio.
//! Replies are matched to pending requests by `request_id`; everything else
//! the bridge prints is forwarded as a [`ProviderEvent`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use relaygate_provider_protocol::{
    BridgeLine, MediaResult, ProviderCommand, ProviderReply, RegisteredResult, SentResult,
};

use super::{
    ChatSummary, MediaBlob, Presence, ProviderAdapter, ProviderConnection, ProviderError,
    ProviderEvent, ProviderFactory,
};
use crate::config::ProviderConfig;

/// Requests waiting for a reply, keyed by request id.
type PendingReplies = Arc<DashMap<String, oneshot::Sender<ProviderReply>>>;

/// How long to let the bridge exit on its own after `destroy`.
const DESTROY_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Factory
// ============================================================================

/// Spawns one bridge process per session.
pub struct SubprocessProviderFactory {
    config: ProviderConfig,
}

impl SubprocessProviderFactory {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn spawn_child(&self, session_key: &str, instance_id: &str) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env("RELAYGATE_SESSION_KEY", session_key)
            .env("RELAYGATE_INSTANCE_ID", instance_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // SAFETY: pre_exec runs in the forked child before exec. PR_SET_PDEATHSIG
        // only configures the child's own death signal and touches no shared state.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }
}

impl ProviderFactory for SubprocessProviderFactory {
    fn connect(
        &self,
        session_key: &str,
        instance_id: &str,
    ) -> Result<ProviderConnection, ProviderError> {
        let mut child = self
            .spawn_child(session_key, instance_id)
            .map_err(ProviderError::Spawn)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ProviderError::Spawn(std::io::Error::other(
                "bridge stdio was not piped",
            )));
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (evt_tx, evt_rx) = mpsc::channel(100);
        let pending: PendingReplies = Arc::new(DashMap::new());

        info!(
            session_key = %session_key,
            command = %self.config.command,
            "Spawned provider bridge"
        );

        tokio::spawn(run_bridge(
            BridgeIo {
                child,
                stdin,
                stdout,
            },
            cmd_rx,
            evt_tx,
            pending.clone(),
            session_key.to_string(),
        ));

        let adapter = SubprocessProvider {
            command_tx: cmd_tx,
            pending,
            request_timeout: Duration::from_secs(self.config.request_timeout_seconds),
        };

        Ok(ProviderConnection {
            adapter: Arc::new(adapter),
            events: evt_rx,
        })
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// [`ProviderAdapter`] backed by a bridge subprocess.
pub struct SubprocessProvider {
    command_tx: mpsc::Sender<ProviderCommand>,
    pending: PendingReplies,
    request_timeout: Duration,
}

impl SubprocessProvider {
    /// Send a command that expects a reply and wait for it.
    async fn request(
        &self,
        build: impl FnOnce(String) -> ProviderCommand,
    ) -> Result<serde_json::Value, ProviderError> {
        let request_id = Ulid::new().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), reply_tx);

        if self.command_tx.send(build(request_id.clone())).await.is_err() {
            self.pending.remove(&request_id);
            return Err(ProviderError::ChannelClosed);
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(ProviderReply::Response { result, .. })) => Ok(result),
            Ok(Ok(ProviderReply::Error { message, .. })) => Err(ProviderError::Rejected(message)),
            Ok(Err(_)) => Err(ProviderError::ChannelClosed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(ProviderError::Timeout)
            }
        }
    }

    /// Send a command that has no reply.
    async fn notify(&self, command: ProviderCommand) -> Result<(), ProviderError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ProviderError::ChannelClosed)
    }
}

#[async_trait]
impl ProviderAdapter for SubprocessProvider {
    async fn initialize(&self) -> Result<(), ProviderError> {
        self.notify(ProviderCommand::Initialize).await
    }

    async fn is_registered_address(&self, address: &str) -> Result<bool, ProviderError> {
        let result = self
            .request(|request_id| ProviderCommand::IsRegistered {
                request_id,
                address: address.to_string(),
            })
            .await?;
        let parsed: RegisteredResult = serde_json::from_value(result)?;
        Ok(parsed.registered)
    }

    async fn set_typing_state(
        &self,
        address: &str,
        presence: Presence,
    ) -> Result<(), ProviderError> {
        self.request(|request_id| ProviderCommand::SetPresence {
            request_id,
            address: address.to_string(),
            presence,
        })
        .await
        .map(|_| ())
    }

    async fn clear_typing_state(&self, address: &str) -> Result<(), ProviderError> {
        self.request(|request_id| ProviderCommand::ClearPresence {
            request_id,
            address: address.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn send_message(&self, address: &str, content: &str) -> Result<String, ProviderError> {
        let result = self
            .request(|request_id| ProviderCommand::SendMessage {
                request_id,
                address: address.to_string(),
                content: content.to_string(),
            })
            .await?;
        let parsed: SentResult = serde_json::from_value(result)?;
        Ok(parsed.message_id)
    }

    async fn fetch_media(&self, provider_message_id: &str) -> Result<MediaBlob, ProviderError> {
        let result = self
            .request(|request_id| ProviderCommand::FetchMedia {
                request_id,
                message_id: provider_message_id.to_string(),
            })
            .await?;
        let parsed: MediaResult = serde_json::from_value(result)?;
        let data = BASE64
            .decode(parsed.data.as_bytes())
            .map_err(|e| ProviderError::InvalidResponse(format!("media is not base64: {e}")))?;
        Ok(MediaBlob {
            mime_type: parsed.mime_type,
            data: data.into(),
        })
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ProviderError> {
        let result = self
            .request(|request_id| ProviderCommand::ListChats { request_id })
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.request(|request_id| ProviderCommand::Logout { request_id })
            .await
            .map(|_| ())
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        self.notify(ProviderCommand::Destroy).await
    }
}

// ============================================================================
// Bridge loop
// ============================================================================

struct BridgeIo {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

/// Pump commands into the bridge and replies/events out of it until either
/// side goes away. Always ends with a `Disconnected` event unless the bridge
/// already sent one.
async fn run_bridge(
    io: BridgeIo,
    mut cmd_rx: mpsc::Receiver<ProviderCommand>,
    evt_tx: mpsc::Sender<ProviderEvent>,
    pending: PendingReplies,
    session_key: String,
) {
    let BridgeIo {
        mut child,
        mut stdin,
        stdout,
    } = io;
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut saw_disconnect = false;
    let mut exit_reason = "bridge closed".to_string();

    loop {
        tokio::select! {
            biased;

            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match route_line(&line, &pending, &evt_tx, &session_key).await {
                            LineOutcome::Continue => {}
                            LineOutcome::Disconnected => saw_disconnect = true,
                            LineOutcome::EventsClosed => break,
                        }
                    }
                    Ok(None) => {
                        debug!(session_key = %session_key, "Bridge stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(session_key = %session_key, error = %e, "Error reading bridge stdout");
                        exit_reason = format!("bridge read error: {e}");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(command) = cmd else {
                    debug!(session_key = %session_key, "Command channel closed");
                    break;
                };
                let is_destroy = matches!(command, ProviderCommand::Destroy);
                if let Err(e) = write_command(&mut stdin, &command).await {
                    error!(session_key = %session_key, error = %e, "Failed to write to bridge stdin");
                    if let Some(request_id) = command.request_id() {
                        pending.remove(request_id);
                    }
                    exit_reason = format!("bridge write error: {e}");
                    break;
                }
                if is_destroy {
                    tokio::time::sleep(DESTROY_GRACE).await;
                    exit_reason = "destroyed".to_string();
                    break;
                }
            }

            status = child.wait() => {
                match status {
                    Ok(status) => {
                        info!(session_key = %session_key, status = %status, "Provider bridge exited");
                        exit_reason = format!("bridge exited ({status})");
                    }
                    Err(e) => {
                        error!(session_key = %session_key, error = %e, "Error waiting for bridge");
                        exit_reason = format!("bridge wait error: {e}");
                    }
                }
                // Lines written just before exit are still buffered in the pipe.
                while let Ok(Some(line)) = stdout_reader.next_line().await {
                    match route_line(&line, &pending, &evt_tx, &session_key).await {
                        LineOutcome::Continue => {}
                        LineOutcome::Disconnected => saw_disconnect = true,
                        LineOutcome::EventsClosed => break,
                    }
                }
                break;
            }
        }
    }

    // Fail every request still waiting for a reply.
    pending.clear();

    let _ = child.kill().await;

    if !saw_disconnect {
        let _ = evt_tx
            .send(ProviderEvent::Disconnected {
                reason: exit_reason,
            })
            .await;
    }
}

enum LineOutcome {
    Continue,
    Disconnected,
    EventsClosed,
}

/// Hand one stdout line to its waiting request or to the event channel.
async fn route_line(
    line: &str,
    pending: &PendingReplies,
    evt_tx: &mpsc::Sender<ProviderEvent>,
    session_key: &str,
) -> LineOutcome {
    if line.trim().is_empty() {
        return LineOutcome::Continue;
    }
    match serde_json::from_str::<BridgeLine>(line) {
        Ok(BridgeLine::Reply(reply)) => {
            match pending.remove(reply.request_id()) {
                Some((_, reply_tx)) => {
                    let _ = reply_tx.send(reply);
                }
                None => {
                    debug!(
                        session_key = %session_key,
                        request_id = %reply.request_id(),
                        "Reply for unknown or expired request"
                    );
                }
            }
            LineOutcome::Continue
        }
        Ok(BridgeLine::Event(event)) => {
            let disconnected = matches!(event, ProviderEvent::Disconnected { .. });
            if evt_tx.send(event).await.is_err() {
                debug!(session_key = %session_key, "Event channel closed");
                return LineOutcome::EventsClosed;
            }
            if disconnected {
                LineOutcome::Disconnected
            } else {
                LineOutcome::Continue
            }
        }
        Err(e) => {
            warn!(
                session_key = %session_key,
                line = %line,
                error = %e,
                "Failed to parse bridge line"
            );
            LineOutcome::Continue
        }
    }
}

async fn write_command(stdin: &mut ChildStdin, command: &ProviderCommand) -> std::io::Result<()> {
    let mut line = serde_json::to_string(command).map_err(std::io::Error::other)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn shell_config(script: &str) -> ProviderConfig {
        ProviderConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
            request_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let factory = SubprocessProviderFactory::new(ProviderConfig {
            command: "/nonexistent/relaygate-bridge".to_string(),
            args: vec![],
            env: HashMap::new(),
            request_timeout_seconds: 1,
        });
        let result = factory.connect("acct1", "inst_1");
        assert!(matches!(result, Err(ProviderError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_events_are_forwarded_and_exit_disconnects() {
        let factory = SubprocessProviderFactory::new(shell_config(
            r#"echo '{"type":"pairing_challenge","payload":"2@qr"}'; echo '{"type":"ready","account_address":"5511@c.us"}'"#,
        ));
        let mut conn = factory.connect("acct1", "inst_1").unwrap();

        assert_eq!(
            conn.events.recv().await,
            Some(ProviderEvent::PairingChallenge {
                payload: "2@qr".to_string()
            })
        );
        assert_eq!(
            conn.events.recv().await,
            Some(ProviderEvent::Ready {
                account_address: "5511@c.us".to_string()
            })
        );
        match conn.events.recv().await {
            Some(ProviderEvent::Disconnected { .. }) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_reply_correlation() {
        // Echo every request id back as a successful send.
        let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
  if [ -n "$id" ]; then
    printf '{"type":"response","request_id":"%s","result":{"message_id":"wamid-%s"}}\n' "$id" "$id"
  fi
done
"#;
        let factory = SubprocessProviderFactory::new(shell_config(script));
        let conn = factory.connect("acct1", "inst_1").unwrap();

        let id = conn.adapter.send_message("5511@c.us", "hi").await.unwrap();
        assert!(id.starts_with("wamid-"));
    }

    #[tokio::test]
    async fn test_error_reply_maps_to_rejected() {
        let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
  if [ -n "$id" ]; then
    printf '{"type":"error","request_id":"%s","message":"not connected"}\n' "$id"
  fi
done
"#;
        let factory = SubprocessProviderFactory::new(shell_config(script));
        let conn = factory.connect("acct1", "inst_1").unwrap();

        let err = conn.adapter.is_registered_address("5511").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(ref m) if m == "not connected"));
    }

    #[tokio::test]
    async fn test_requests_fail_after_bridge_exit() {
        let factory = SubprocessProviderFactory::new(shell_config("exit 0"));
        let mut conn = factory.connect("acct1", "inst_1").unwrap();

        // Wait for the synthetic disconnect so the bridge loop has finished.
        assert!(matches!(
            conn.events.recv().await,
            Some(ProviderEvent::Disconnected { .. })
        ));

        let err = conn.adapter.send_message("5511", "hi").await.unwrap_err();
        assert!(matches!(err, ProviderError::ChannelClosed));
    }
}
