//! Request DTOs
//!
//! Data structures for API request bodies.

use serde::Deserialize;
use validator::Validate;

use crate::domain::{Modality, SignalKind};

/// Create session request
#[derive(Debug, Deserialize, Validate)]
pub struct RequestSessionRequest {
    /// The reader being consulted
    pub reader_id: i64,

    pub modality: Modality,

    /// The rate the client is confirming, in cents per minute. Must match
    /// the reader's currently listed rate.
    #[validate(range(min = 1, message = "Rate must be positive"))]
    pub rate_cents_per_minute: i64,
}

/// Reader's decision on a pending session
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RespondAction {
    Accept,
    Reject,
}

/// Respond-to-session request
#[derive(Debug, Deserialize)]
pub struct RespondToSessionRequest {
    pub action: RespondAction,
}

/// Relay a signaling payload to the other participant
#[derive(Debug, Deserialize, Validate)]
pub struct SendSignalRequest {
    pub to_user: i64,

    pub kind: SignalKind,

    /// Opaque handshake blob; the relay never interprets it
    pub payload: serde_json::Value,
}

/// End session request. The reason is derived from the caller's role;
/// the body exists so clients can state intent explicitly.
#[derive(Debug, Default, Deserialize)]
pub struct EndSessionRequest {
    pub reason: Option<String>,
}

/// Update the caller's reader profile
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateReaderRequest {
    pub accepting_sessions: Option<bool>,

    #[validate(range(min = 1, message = "Rate must be positive"))]
    pub rate_cents_per_minute: Option<i64>,
}
