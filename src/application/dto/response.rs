//! Response DTOs
//!
//! Data structures for API responses and gateway push payloads.
//! User ids are serialized as strings so 64-bit values survive JavaScript
//! number precision.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{ReaderProfile, Session, SignalMessage, Wallet};

/// Session state and accumulators as exposed to participants.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub client_id: String,
    pub reader_id: String,
    pub modality: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    pub rate_cents_per_minute: i64,
    pub billed_seconds: i64,
    pub charged_cents: i64,
    pub reader_credited_cents: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            client_id: session.client_id.to_string(),
            reader_id: session.reader_id.to_string(),
            modality: session.modality.as_str().to_string(),
            state: session.state.as_str().to_string(),
            close_reason: session.close_reason.map(|r| r.as_str().to_string()),
            rate_cents_per_minute: session.rate_cents_per_minute,
            billed_seconds: session.billed_seconds,
            charged_cents: session.charged_cents,
            reader_credited_cents: session.reader_credited_cents,
            created_at: session.created_at,
            accepted_at: session.accepted_at,
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }
}

/// A relayed signaling payload.
#[derive(Debug, Clone, Serialize)]
pub struct SignalResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<SignalMessage> for SignalResponse {
    fn from(message: SignalMessage) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            sender_id: message.sender_id.to_string(),
            recipient_id: message.recipient_id.to_string(),
            kind: message.kind.as_str().to_string(),
            payload: message.payload,
            created_at: message.created_at,
        }
    }
}

/// The caller's wallet.
#[derive(Debug, Clone, Serialize)]
pub struct WalletResponse {
    pub balance_cents: i64,
    pub earned_cents: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            balance_cents: wallet.balance_cents,
            earned_cents: wallet.earned_cents,
            updated_at: wallet.updated_at,
        }
    }
}

/// A reader's public availability and rate.
#[derive(Debug, Clone, Serialize)]
pub struct ReaderResponse {
    pub user_id: String,
    pub accepting_sessions: bool,
    pub rate_cents_per_minute: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<ReaderProfile> for ReaderResponse {
    fn from(profile: ReaderProfile) -> Self {
        Self {
            user_id: profile.user_id.to_string(),
            accepting_sessions: profile.accepting_sessions,
            rate_cents_per_minute: profile.rate_cents_per_minute,
            updated_at: profile.updated_at,
        }
    }
}
