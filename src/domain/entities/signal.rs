//! SignalMessage entity and repository trait.
//!
//! Maps to the `signal_messages` table in the database schema.
//! Signals are opaque handshake payloads (offers, answers, network-path
//! candidates) relayed between the two session participants while a peer
//! channel is negotiated. The relay does not interpret payloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Signal payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    ConnectionState,
}

impl SignalKind {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "connection_state" => Some(Self::ConnectionState),
            _ => None,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::ConnectionState => "connection_state",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One opaque handshake payload.
///
/// Maps to the `signal_messages` table:
/// - id: UUID PRIMARY KEY -- v7, so id order is creation order
/// - session_id: UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE
/// - sender_id / recipient_id: BIGINT NOT NULL
/// - kind: signal_kind NOT NULL
/// - payload: JSONB NOT NULL
/// - delivered: BOOLEAN NOT NULL DEFAULT FALSE
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    /// UUIDv7 primary key; sorting by id yields creation order
    pub id: Uuid,

    pub session_id: Uuid,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub kind: SignalKind,

    /// Opaque payload blob, never interpreted by the relay
    pub payload: serde_json::Value,

    /// Set once the message has been handed to the recipient (push or poll)
    pub delivered: bool,

    pub created_at: DateTime<Utc>,
}

impl SignalMessage {
    /// Create a new undelivered signal.
    pub fn new(
        session_id: Uuid,
        sender_id: i64,
        recipient_id: i64,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            sender_id,
            recipient_id,
            kind,
            payload,
            delivered: false,
            created_at: Utc::now(),
        }
    }
}

/// Repository trait for SignalMessage data access operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Append a signal to the relay.
    async fn create(&self, message: &SignalMessage) -> Result<SignalMessage, AppError>;

    /// Atomically mark-and-return all undelivered messages for `recipient_id`
    /// in the session, in creation order. A message returned once is never
    /// returned again.
    async fn take_undelivered(
        &self,
        session_id: Uuid,
        recipient_id: i64,
    ) -> Result<Vec<SignalMessage>, AppError>;

    /// Mark a single message delivered (push path). Returns false when the
    /// message was already delivered or does not exist.
    async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError>;

    /// Drop all of a session's messages once it reaches a terminal state.
    async fn delete_for_session(&self, session_id: Uuid) -> Result<u64, AppError>;
}
