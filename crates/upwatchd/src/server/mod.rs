//! Unix socket server for the upwatch daemon.
//!
//! The server:
//! - Listens on a Unix socket for listener connections
//! - Spawns a `ConnectionHandler` per client
//! - Forwards scheduler bus events (status, heartbeat) to all subscribers
//! - Supports graceful shutdown via CancellationToken
//!
//! The daemon publishes on its own cadence whether or not anyone is
//! connected; subscribers only affect who hears the broadcasts.

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SubscriberWriter, SubscribersMap};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use connection::WRITE_TIMEOUT;

use upwatch_protocol::DaemonMessage;

use crate::scheduler::{BusEvent, SchedulerHandle};

/// Maximum number of concurrent subscribed listeners.
pub const MAX_SUBSCRIBERS: usize = 10;

/// Unix socket server broadcasting engine results to listeners.
pub struct DaemonServer {
    /// Path to the Unix socket.
    socket_path: PathBuf,

    /// Handle to the scheduler actor (queries and event subscription).
    scheduler: SchedulerHandle,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs.
    connection_counter: AtomicU64,

    /// Active subscribers keyed by client ID.
    subscribers: SubscribersMap,
}

impl DaemonServer {
    /// Creates a new daemon server.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        scheduler: SchedulerHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            scheduler,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(socket = %self.socket_path.display(), "Daemon server listening");

        self.spawn_event_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Spawns a per-client handler task.
    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let scheduler = self.scheduler.clone();
        let subscribers = Arc::clone(&self.subscribers);

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(
                reader,
                writer,
                scheduler,
                Arc::clone(&subscribers),
                connection_number,
            );

            let client_id = handler.run().await;

            if let Some(id) = client_id {
                let mut subs = subscribers.write().await;
                if subs.remove(&id).is_some() {
                    debug!(client_id = %id, "Removed disconnected subscriber");
                }
            }
        });
    }

    /// Spawns the task forwarding scheduler bus events to subscribers.
    fn spawn_event_broadcaster(&self) {
        let mut event_rx = self.scheduler.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Event broadcaster shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                broadcast_event(&subscribers, event).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event broadcaster lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Returns the number of active subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Performs cleanup on shutdown.
    async fn cleanup(&self) {
        {
            let mut subs = self.subscribers.write().await;
            subs.clear();
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Forwards one bus event to every subscriber, evicting dead ones.
async fn broadcast_event(subscribers: &SubscribersMap, event: BusEvent) {
    let msg = match event {
        BusEvent::Status(code) => DaemonMessage::status(code),
        BusEvent::Heartbeat => DaemonMessage::Heartbeat,
    };

    let json = match serde_json::to_string(&msg) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "Failed to serialize bus event");
            return;
        }
    };

    let subs = subscribers.read().await;
    let mut failed_clients = Vec::new();

    for (client_id, writer) in subs.iter() {
        let mut writer = writer.lock().await;
        // Bounded write: a subscriber that stops reading must not stall the
        // broadcast for everyone else.
        let send_result = timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await;

        match send_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client_id = %client_id, error = %e, "Failed to send event to subscriber");
                failed_clients.push(client_id.clone());
            }
            Err(_) => {
                warn!(client_id = %client_id, "Subscriber write timed out");
                failed_clients.push(client_id.clone());
            }
        }
    }

    // Eviction needs the write lock, so the read lock goes first.
    drop(subs);

    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed_clients {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "Removed failed subscriber");
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
    use tokio::net::UnixStream;
    use tokio::sync::Mutex;

    /// Fills a stream's send buffer so further writes block.
    async fn fill_send_buffer(write: &tokio::net::unix::OwnedWriteHalf) {
        // A fresh stream has no cached write-readiness, so `try_write`
        // returns `WouldBlock` without writing; register readiness first.
        write.writable().await.unwrap();
        let payload = [0u8; 8192];
        loop {
            match write.try_write(&payload) {
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("failed to fill buffer: {e}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_is_evicted_without_blocking_others() {
        let subscribers: SubscribersMap = Arc::new(RwLock::new(HashMap::new()));

        // One subscriber whose peer never reads: its buffer is full, so any
        // further write stays pending until the timeout.
        let (stalled_local, _stalled_peer) = UnixStream::pair().unwrap();
        let (_stalled_read, stalled_write) = stalled_local.into_split();
        fill_send_buffer(&stalled_write).await;

        let (healthy_local, healthy_peer) = UnixStream::pair().unwrap();
        let (_healthy_read, healthy_write) = healthy_local.into_split();

        {
            let mut subs = subscribers.write().await;
            subs.insert(
                "stalled".to_string(),
                Arc::new(Mutex::new(BufWriter::new(stalled_write))),
            );
            subs.insert(
                "healthy".to_string(),
                Arc::new(Mutex::new(BufWriter::new(healthy_write))),
            );
        }

        broadcast_event(&subscribers, BusEvent::Heartbeat).await;

        // The stalled subscriber is evicted; the healthy one survives and
        // actually received the event.
        {
            let subs = subscribers.read().await;
            assert!(!subs.contains_key("stalled"));
            assert!(subs.contains_key("healthy"));
        }

        let (peer_read, _peer_write) = healthy_peer.into_split();
        let mut reader = BufReader::new(peer_read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.contains("heartbeat"));
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }
}
