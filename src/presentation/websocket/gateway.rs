//! WebSocket Gateway
//!
//! Manages WebSocket connections and pushes session lifecycle, signaling,
//! and billing events to the affected participants. Every event is targeted
//! at explicit user ids; there are no broadcast-to-everyone events.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::messages::{GatewaySend, OpCode};
use crate::application::dto::response::{SessionResponse, SignalResponse};

/// Gateway event types pushed to participants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum GatewayEvent {
    // Session lifecycle
    #[serde(rename = "SESSION_REQUESTED")]
    SessionRequested(serde_json::Value),
    #[serde(rename = "SESSION_ACCEPTED")]
    SessionAccepted(serde_json::Value),
    #[serde(rename = "SESSION_REJECTED")]
    SessionRejected(serde_json::Value),
    #[serde(rename = "SESSION_CANCELLED")]
    SessionCancelled(serde_json::Value),
    #[serde(rename = "SESSION_STARTED")]
    SessionStarted(serde_json::Value),
    #[serde(rename = "SESSION_ENDED")]
    SessionEnded(serde_json::Value),

    // Signaling
    #[serde(rename = "SIGNAL")]
    Signal(serde_json::Value),

    // Billing
    #[serde(rename = "BILLING_TICK")]
    BillingTick(BillingTickEvent),
    #[serde(rename = "LOW_BALANCE")]
    LowBalance(LowBalanceEvent),

    // Link health
    #[serde(rename = "CONNECTION_HEALTH")]
    ConnectionHealth(ConnectionHealthEvent),
}

impl GatewayEvent {
    /// Get the event name for dispatch
    pub fn event_name(&self) -> &'static str {
        match self {
            GatewayEvent::SessionRequested(_) => "SESSION_REQUESTED",
            GatewayEvent::SessionAccepted(_) => "SESSION_ACCEPTED",
            GatewayEvent::SessionRejected(_) => "SESSION_REJECTED",
            GatewayEvent::SessionCancelled(_) => "SESSION_CANCELLED",
            GatewayEvent::SessionStarted(_) => "SESSION_STARTED",
            GatewayEvent::SessionEnded(_) => "SESSION_ENDED",
            GatewayEvent::Signal(_) => "SIGNAL",
            GatewayEvent::BillingTick(_) => "BILLING_TICK",
            GatewayEvent::LowBalance(_) => "LOW_BALANCE",
            GatewayEvent::ConnectionHealth(_) => "CONNECTION_HEALTH",
        }
    }

    /// Convert to JSON value for sending
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GatewayEvent::SessionRequested(v)
            | GatewayEvent::SessionAccepted(v)
            | GatewayEvent::SessionRejected(v)
            | GatewayEvent::SessionCancelled(v)
            | GatewayEvent::SessionStarted(v)
            | GatewayEvent::SessionEnded(v)
            | GatewayEvent::Signal(v) => v.clone(),
            GatewayEvent::BillingTick(e) => serde_json::to_value(e).unwrap_or_default(),
            GatewayEvent::LowBalance(e) => serde_json::to_value(e).unwrap_or_default(),
            GatewayEvent::ConnectionHealth(e) => serde_json::to_value(e).unwrap_or_default(),
        }
    }

    /// Build a session lifecycle event from a session payload.
    pub fn session_event(name: &str, session: SessionResponse) -> Self {
        let value = serde_json::to_value(session).unwrap_or_default();
        match name {
            "SESSION_REQUESTED" => Self::SessionRequested(value),
            "SESSION_ACCEPTED" => Self::SessionAccepted(value),
            "SESSION_REJECTED" => Self::SessionRejected(value),
            "SESSION_CANCELLED" => Self::SessionCancelled(value),
            "SESSION_STARTED" => Self::SessionStarted(value),
            _ => Self::SessionEnded(value),
        }
    }

    /// Build a signal push event.
    pub fn signal(signal: SignalResponse) -> Self {
        Self::Signal(serde_json::to_value(signal).unwrap_or_default())
    }
}

/// One applied billing interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingTickEvent {
    pub session_id: Uuid,
    pub seq: i32,
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub charged_cents_total: i64,
    pub billed_seconds_total: i64,
}

/// Balance is running out; shown to the client before depletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowBalanceEvent {
    pub session_id: Uuid,
    pub balance_cents: i64,
    pub interval_charge_cents: i64,
    pub remaining_intervals: i64,
}

/// Derived link health changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealthEvent {
    pub session_id: Uuid,
    pub health: String,
}

/// Internal event wrapper with routing information
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub event: GatewayEvent,
    /// Target user IDs; only their connections receive the event
    pub target_users: Vec<i64>,
}

/// Connected client with message sender
pub struct ConnectedClient {
    pub user_id: i64,
    pub connection_id: String,
    pub sender: mpsc::UnboundedSender<GatewaySend>,
}

/// WebSocket gateway managing all connections
pub struct Gateway {
    /// Active connections by connection_id
    connections: DashMap<String, Arc<ConnectedClient>>,
    /// User ID to connection IDs mapping (one user can have multiple tabs)
    user_connections: DashMap<i64, Vec<String>>,
    /// Broadcast channel for events
    event_tx: broadcast::Sender<RoutedEvent>,
    /// Heartbeat interval in milliseconds
    heartbeat_interval_ms: u64,
}

impl Gateway {
    pub fn new(heartbeat_interval_ms: u64) -> Self {
        let (event_tx, _) = broadcast::channel(10000);
        Self {
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            event_tx,
            heartbeat_interval_ms,
        }
    }

    /// Get the heartbeat interval
    pub fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    /// Subscribe to gateway events
    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.event_tx.subscribe()
    }

    /// Register a new connected client
    pub fn register_connection(
        &self,
        connection_id: String,
        user_id: i64,
        sender: mpsc::UnboundedSender<GatewaySend>,
    ) {
        let client = Arc::new(ConnectedClient {
            user_id,
            connection_id: connection_id.clone(),
            sender,
        });

        self.connections.insert(connection_id.clone(), client);
        self.user_connections
            .entry(user_id)
            .or_default()
            .push(connection_id.clone());

        tracing::info!(
            user_id = user_id,
            connection_id = %connection_id,
            "Gateway connection registered"
        );
    }

    /// Unregister a connection
    pub fn unregister_connection(&self, connection_id: &str) {
        if let Some((_, client)) = self.connections.remove(connection_id) {
            if let Some(mut conns) = self.user_connections.get_mut(&client.user_id) {
                conns.retain(|c| c != connection_id);
            }

            tracing::info!(
                user_id = client.user_id,
                connection_id = %connection_id,
                "Gateway connection unregistered"
            );
        }
    }

    /// Dispatch an event to the given users' connections
    pub fn dispatch_to_users(&self, event: GatewayEvent, user_ids: Vec<i64>) {
        let routed = RoutedEvent {
            event,
            target_users: user_ids,
        };
        let _ = self.event_tx.send(routed);
    }

    /// Push a message directly to all of a user's connections.
    /// Returns true when at least one live connection accepted it.
    pub fn send_to_user(&self, user_id: i64, message: GatewaySend) -> bool {
        let mut delivered = false;
        if let Some(connection_ids) = self.user_connections.get(&user_id) {
            for connection_id in connection_ids.value() {
                if let Some(client) = self.connections.get(connection_id) {
                    if client.sender.send(message.clone()).is_ok() {
                        delivered = true;
                    }
                }
            }
        }
        delivered
    }

    /// Push a dispatch-framed event directly to one user.
    /// Returns true when at least one live connection accepted it.
    pub fn push_event_to_user(&self, user_id: i64, event: &GatewayEvent) -> bool {
        let message = GatewaySend {
            op: OpCode::Dispatch as u8,
            d: Some(event.to_json()),
            s: None,
            t: Some(event.event_name().to_string()),
        };
        self.send_to_user(user_id, message)
    }

    /// Check if user is online (has at least one connection)
    pub fn is_user_online(&self, user_id: i64) -> bool {
        self.user_connections
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(5000)
    }
}
