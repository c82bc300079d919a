//! WebSocket Message Types
//!
//! Gateway wire format: a thin op/payload envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Event dispatch (server -> client)
    Dispatch = 0,
    /// Heartbeat (client -> server)
    Heartbeat = 1,
    /// Identify (client -> server)
    Identify = 2,
    /// Invalid session (server -> client, connection will close)
    InvalidSession = 9,
    /// Hello (server -> client, first frame)
    Hello = 10,
    /// Heartbeat ACK (server -> client)
    HeartbeatAck = 11,
}

/// Incoming gateway message
#[derive(Debug, Deserialize)]
pub struct GatewayReceive {
    pub op: u8,
    pub d: Option<serde_json::Value>,
}

/// Outgoing gateway message
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySend {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Hello payload (op 10)
#[derive(Debug, Serialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Ready payload (dispatch READY)
#[derive(Debug, Serialize)]
pub struct ReadyPayload {
    pub user_id: String,
    pub connection_id: String,
}

/// Identify payload (op 2)
#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

/// Heartbeat payload (op 1). When a session id is present the heartbeat
/// also feeds that session's link monitor.
#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    pub session_id: Option<Uuid>,
}
