//! Connection handler for individual listener connections.
//!
//! Each connection gets its own handler that performs the version
//! handshake, answers `GetStatus` queries via the scheduler, and registers
//! subscribers for event broadcasts.
//!
//! There is no idle read timeout: a subscribed listener is event-driven
//! and may legitimately never write again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use upwatch_protocol::{ClientMessage, ClientRequest, DaemonMessage, ProtocolVersion};

use crate::scheduler::SchedulerHandle;

use super::MAX_SUBSCRIBERS;

/// Shared writer handle for a subscribed client.
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Subscribers map, keyed by client ID.
pub type SubscribersMap = Arc<RwLock<HashMap<String, SubscriberWriter>>>;

/// Maximum message size (64 KB - requests are tiny).
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Write timeout, shared with the event broadcaster.
pub(super) const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ClientId = String;

/// Handler for a single listener connection.
pub struct ConnectionHandler {
    /// Buffered reader for incoming requests.
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer, shared with the event broadcaster once subscribed.
    writer: SubscriberWriter,

    /// Handle to the scheduler actor.
    scheduler: SchedulerHandle,

    /// Shared subscribers map.
    subscribers: SubscribersMap,

    /// Client identifier, assigned during the handshake.
    client_id: Option<ClientId>,

    /// Connection number used for generated client IDs.
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        scheduler: SchedulerHandle,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            scheduler,
            subscribers,
            client_id: None,
            connection_number,
        }
    }

    /// Runs the handler: handshake, then the request loop.
    ///
    /// Returns the client ID (if the handshake completed) so the server can
    /// drop any leftover subscription.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }

        info!(client_id = ?self.client_id, "Client handshake completed");
        let client_id = self.client_id.clone();

        if let Err(e) = self.process_requests().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        client_id
    }

    /// Expects a `Connect` request, validates the protocol version, and
    /// replies `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_request().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.request {
            ClientRequest::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));

                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id)).await?;
                Ok(())
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Reads and serves requests until the connection closes.
    async fn process_requests(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match self.read_request().await {
                Ok(msg) => msg,
                Err(ConnectionError::Eof) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.handle_request(msg).await {
                if matches!(e, ConnectionError::Eof) {
                    return Ok(());
                }
                warn!(client_id = ?self.client_id, error = %e, "Error handling request");
                let _ = self.send_message(DaemonMessage::error(&e.to_string())).await;
            }
        }
    }

    /// Serves a single request.
    async fn handle_request(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.request {
            ClientRequest::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            ClientRequest::GetStatus => {
                debug!(client_id = ?self.client_id, "GetStatus query");
                // One full engine run; the reply waits for the probes.
                let code = self
                    .scheduler
                    .query_status()
                    .await
                    .map_err(|e| ConnectionError::Scheduler(e.to_string()))?;
                self.send_message(DaemonMessage::status(code)).await?;
            }

            ClientRequest::Subscribe => {
                let client_id = match &self.client_id {
                    Some(id) => id.clone(),
                    None => {
                        self.send_message(DaemonMessage::error(
                            "Must connect before subscribing",
                        ))
                        .await?;
                        return Ok(());
                    }
                };

                {
                    let mut subs = self.subscribers.write().await;

                    if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                        self.send_message(DaemonMessage::error(&format!(
                            "Too many subscribers (max: {MAX_SUBSCRIBERS})"
                        )))
                        .await?;
                        return Ok(());
                    }

                    subs.insert(client_id.clone(), Arc::clone(&self.writer));
                }

                debug!(client_id = %client_id, "Client subscribed to broadcasts");
            }

            ClientRequest::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Reads a single request line.
    async fn read_request(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))
    }

    /// Sends one message, bounded by the write timeout.
    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::Parse(e.to_string()))?;

        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 100_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("100000"));
    }
}
