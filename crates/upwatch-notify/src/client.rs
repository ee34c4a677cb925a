//! Daemon connection client for the listener.
//!
//! Handles connection to the daemon's Unix socket, automatic reconnection
//! with exponential backoff, the subscribe handshake, and forwarding of
//! broadcasts to the listener state machine. A `Query` command sends
//! `GetStatus`; the reply arrives as an ordinary `Status` message and flows
//! through the same event path as a broadcast.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use upwatch_core::StatusCode;
use upwatch_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};

/// Events forwarded to the listener state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A status broadcast, or the reply to a `Query`.
    Status(StatusCode),

    /// A heartbeat broadcast.
    Heartbeat,

    /// The daemon connection dropped. Informational only: daemon loss is
    /// surfaced to the user via the heartbeat-timeout path, never directly.
    Disconnected,
}

/// Commands the client accepts while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Send a `GetStatus` query.
    Query,
}

/// Connection behavior configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path to the daemon's Unix socket.
    pub socket_path: PathBuf,

    /// Initial delay before the first reconnect attempt.
    pub retry_initial_delay: Duration,

    /// Cap on the reconnect delay.
    pub retry_max_delay: Duration,

    /// Backoff multiplier between attempts.
    pub retry_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(upwatch_core::config::DEFAULT_SOCKET_PATH),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            retry_multiplier: 2.0,
        }
    }
}

/// Client maintaining the connection to the daemon.
pub struct DaemonClient {
    config: ClientConfig,

    /// Events towards the listener state machine.
    event_tx: mpsc::UnboundedSender<ListenerEvent>,

    /// Commands from the late-join query task (and anything else).
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientCommand>>,

    cancel_token: CancellationToken,
}

impl DaemonClient {
    pub fn new(
        config: ClientConfig,
        event_tx: mpsc::UnboundedSender<ListenerEvent>,
        command_rx: mpsc::UnboundedReceiver<ClientCommand>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            cancel_token,
        }
    }

    /// Runs until cancelled: connect with backoff, subscribe, pump
    /// messages, reconnect on loss.
    pub async fn run(&self) {
        info!(
            socket_path = %self.config.socket_path.display(),
            "Daemon client starting"
        );

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Daemon client shutting down (cancelled)");
                return;
            }

            match self.connect_with_retry().await {
                Ok(stream) => {
                    info!("Connected to daemon");

                    if let Err(e) = self.handle_connection(stream).await {
                        warn!(error = %e, "Connection ended with error");
                    }

                    // Listener logs this; the user-visible signal is the
                    // heartbeat timeout.
                    let _ = self.event_tx.send(ListenerEvent::Disconnected);
                }
                Err(ClientError::Cancelled) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to connect to daemon");
                }
            }

            if self.cancel_token.is_cancelled() {
                info!("Daemon client shutting down (cancelled)");
                return;
            }
        }
    }

    /// Connects with exponential backoff until successful or cancelled.
    async fn connect_with_retry(&self) -> Result<UnixStream, ClientError> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            if self.config.socket_path.exists() {
                match UnixStream::connect(&self.config.socket_path).await {
                    Ok(stream) => {
                        debug!(attempt, "Connection successful");
                        return Ok(stream);
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            } else if attempt == 1 {
                warn!(
                    socket_path = %self.config.socket_path.display(),
                    "Daemon socket not found, will retry"
                );
            }

            tokio::select! {
                _ = sleep(delay) => {
                    let next_delay_ms =
                        (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                    delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Connection retry cancelled");
                    return Err(ClientError::Cancelled);
                }
            }
        }
    }

    /// Handshake, subscribe, then pump broadcasts and commands.
    async fn handle_connection(&self, stream: UnixStream) -> Result<(), ClientError> {
        let (reader, mut writer) = stream.into_split();
        let mut buf_reader = BufReader::new(reader);

        send_message(&mut writer, &ClientMessage::connect(None)).await?;

        let mut line = String::new();
        buf_reader
            .read_line(&mut line)
            .await
            .map_err(|e| ClientError::Io(e.to_string()))?;

        let response: DaemonMessage =
            serde_json::from_str(line.trim()).map_err(|e| ClientError::Parse(e.to_string()))?;
        match response {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        daemon: protocol_version,
                        client: ProtocolVersion::CURRENT,
                    });
                }
                debug!(client_id = %client_id, "Handshake completed");
            }
            DaemonMessage::Rejected { reason, .. } => {
                return Err(ClientError::Rejected(reason));
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected handshake reply: {other:?}"
                )));
            }
        }

        send_message(&mut writer, &ClientMessage::subscribe()).await?;

        let mut command_rx = self.command_rx.lock().await;
        let mut commands_open = true;

        // Hoisted out of the loop: `read_until` is cancel-safe and appends,
        // so a command winning the select mid-read leaves the partial line
        // intact for the next iteration instead of discarding it.
        // (`read_line` is not cancel-safe: it takes the String into the
        // future, so a cancelled read would lose the partial bytes.)
        let mut line = Vec::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Client connection loop cancelled");
                    let _ = send_message(&mut writer, &ClientMessage::disconnect()).await;
                    return Ok(());
                }

                command = command_rx.recv(), if commands_open => {
                    match command {
                        Some(ClientCommand::Query) => {
                            debug!("Sending status query");
                            send_message(&mut writer, &ClientMessage::get_status()).await?;
                        }
                        None => {
                            // All senders are gone; broadcasts keep flowing
                            // for the life of the connection.
                            debug!("Command channel closed");
                            commands_open = false;
                        }
                    }
                }

                result = buf_reader.read_until(b'\n', &mut line) => {
                    let bytes = result.map_err(|e| ClientError::Io(e.to_string()))?;
                    if bytes == 0 {
                        return Err(ClientError::Disconnected);
                    }
                    let text = std::str::from_utf8(&line)
                        .map_err(|_| ClientError::Io(
                            "stream did not contain valid UTF-8".to_string(),
                        ))?;
                    self.handle_message(text.trim())?;
                    line.clear();
                }
            }
        }
    }

    /// Parses one daemon message and forwards it as a listener event.
    fn handle_message(&self, line: &str) -> Result<(), ClientError> {
        if line.is_empty() {
            return Ok(());
        }

        let msg: DaemonMessage =
            serde_json::from_str(line).map_err(|e| ClientError::Parse(e.to_string()))?;

        let event = match msg {
            DaemonMessage::Status { code } => ListenerEvent::Status(code),
            DaemonMessage::Heartbeat => ListenerEvent::Heartbeat,
            DaemonMessage::Error { message } => {
                warn!(message = %message, "Daemon reported an error");
                return Ok(());
            }
            other => {
                debug!(message = ?other, "Ignoring unexpected daemon message");
                return Ok(());
            }
        };

        self.event_tx
            .send(event)
            .map_err(|_| ClientError::ListenerGone)
    }
}

async fn send_message(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    msg: &ClientMessage,
) -> Result<(), ClientError> {
    let json = serde_json::to_string(msg).map_err(|e| ClientError::Parse(e.to_string()))?;
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    Ok(())
}

/// Errors from the daemon connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Daemon rejected connection: {0}")]
    Rejected(String),

    #[error("Protocol version mismatch: daemon {daemon}, client {client}")]
    VersionMismatch {
        daemon: ProtocolVersion,
        client: ProtocolVersion,
    },

    #[error("Daemon closed the connection")]
    Disconnected,

    #[error("Listener event channel closed")]
    ListenerGone,

    #[error("Cancelled")]
    Cancelled,
}
