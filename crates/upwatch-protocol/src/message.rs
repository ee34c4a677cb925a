//! Protocol message types for daemon/listener communication.

use serde::{Deserialize, Serialize};

use upwatch_core::StatusCode;

use crate::version::ProtocolVersion;

/// Requests a client can make of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Handshake. Must be the first message on a connection.
    Connect {
        /// Client identifier; the daemon assigns one when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Synchronous status query. Triggers one full engine run and is
    /// answered with a `Status` message, independent of the periodic
    /// broadcast cadence.
    GetStatus,

    /// Subscribe to status and heartbeat broadcasts.
    Subscribe,

    /// Client disconnecting gracefully.
    Disconnect,
}

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version of the sender.
    pub protocol_version: ProtocolVersion,

    /// Request payload.
    #[serde(flatten)]
    pub request: ClientRequest,
}

impl ClientMessage {
    /// Wraps a request with the current protocol version.
    pub fn new(request: ClientRequest) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            request,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(ClientRequest::Connect { client_id })
    }

    pub fn get_status() -> Self {
        Self::new(ClientRequest::GetStatus)
    }

    pub fn subscribe() -> Self {
        Self::new(ClientRequest::Subscribe)
    }

    pub fn disconnect() -> Self {
        Self::new(ClientRequest::Disconnect)
    }
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Handshake accepted.
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Handshake rejected (version mismatch, malformed handshake).
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Engine result. Sent both as the periodic broadcast and as the reply
    /// to `GetStatus`.
    Status {
        code: StatusCode,
    },

    /// Liveness broadcast, no payload.
    Heartbeat,

    /// Error response to a malformed or unexpected request.
    Error {
        message: String,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn status(code: StatusCode) -> Self {
        Self::Status { code }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::get_status();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"get_status\""));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_status_message_uses_wire_code() {
        let msg = DaemonMessage::status(StatusCode::UpgradeDetected);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"code\":\"upgrade_detected\""));
    }

    #[test]
    fn test_heartbeat_has_no_payload() {
        let json = serde_json::to_string(&DaemonMessage::Heartbeat).unwrap();
        assert_eq!(json, "{\"type\":\"heartbeat\"}");
    }

    #[test]
    fn test_connect_roundtrip() {
        let original = ClientMessage::connect(Some("listener-1".to_string()));
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();

        match parsed.request {
            ClientRequest::Connect { client_id } => {
                assert_eq!(client_id.as_deref(), Some("listener-1"));
            }
            other => panic!("expected Connect, got {other:?}"),
        }
    }

    #[test]
    fn test_status_roundtrip() {
        let json = serde_json::to_string(&DaemonMessage::status(StatusCode::NoInternet)).unwrap();
        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            DaemonMessage::Status { code } => assert_eq!(code, StatusCode::NoInternet),
            other => panic!("expected Status, got {other:?}"),
        }
    }
}
