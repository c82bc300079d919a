//! Session entity and repository trait.
//!
//! Maps to the `sessions` table in the database schema.
//! A session is one billed client-reader consultation and carries the
//! state machine at the heart of the orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Consultation modality, fixed at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Chat,
    Audio,
    Video,
}

impl Modality {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session lifecycle states.
///
/// Database definition:
/// ```sql
/// CREATE TYPE session_state AS ENUM (
///     'pending',   -- created, awaiting the reader's decision
///     'accepted',  -- reader accepted, link being established
///     'active',    -- link healthy, billing running
///     'ended',     -- terminal: was active, now finished
///     'rejected',  -- terminal: reader declined
///     'cancelled'  -- terminal: cancelled before reaching active
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Accepted,
    Active,
    Ended,
    Rejected,
    Cancelled,
}

impl SessionState {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Rejected | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal state machine edge.
    ///
    /// Edges:
    /// - `pending -> accepted | rejected | cancelled`
    /// - `accepted -> active | cancelled`
    /// - `active -> ended`
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Cancelled)
                | (Self::Accepted, Self::Active)
                | (Self::Accepted, Self::Cancelled)
                | (Self::Active, Self::Ended)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an `active` session reached `ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ClientRequested,
    ReaderRequested,
    BalanceDepleted,
    LinkFailed,
    Error,
}

impl EndReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "client_requested" => Some(Self::ClientRequested),
            "reader_requested" => Some(Self::ReaderRequested),
            "balance_depleted" => Some(Self::BalanceDepleted),
            "link_failed" => Some(Self::LinkFailed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientRequested => "client_requested",
            Self::ReaderRequested => "reader_requested",
            Self::BalanceDepleted => "balance_depleted",
            Self::LinkFailed => "link_failed",
            Self::Error => "error",
        }
    }
}

/// Why a `pending`/`accepted` session reached `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ClientCancelled,
    ReaderCancelled,
    ReaderUnresponsive,
    SetupTimeout,
}

impl CancelReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "client_cancelled" => Some(Self::ClientCancelled),
            "reader_cancelled" => Some(Self::ReaderCancelled),
            "reader_unresponsive" => Some(Self::ReaderUnresponsive),
            "setup_timeout" => Some(Self::SetupTimeout),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientCancelled => "client_cancelled",
            Self::ReaderCancelled => "reader_cancelled",
            Self::ReaderUnresponsive => "reader_unresponsive",
            Self::SetupTimeout => "setup_timeout",
        }
    }
}

/// Union of end and cancel reasons, as stored in `sessions.close_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(untagged)]
pub enum CloseReason {
    Ended(EndReason),
    Cancelled(CancelReason),
}

impl CloseReason {
    pub fn from_str(s: &str) -> Option<Self> {
        EndReason::from_str(s)
            .map(Self::Ended)
            .or_else(|| CancelReason::from_str(s).map(Self::Cancelled))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ended(r) => r.as_str(),
            Self::Cancelled(r) => r.as_str(),
        }
    }
}

impl From<EndReason> for CloseReason {
    fn from(r: EndReason) -> Self {
        Self::Ended(r)
    }
}

impl From<CancelReason> for CloseReason {
    fn from(r: CancelReason) -> Self {
        Self::Cancelled(r)
    }
}

/// Which side of the session a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participant {
    Client,
    Reader,
}

/// Represents one live consultation.
///
/// Maps to the `sessions` table:
/// - id: UUID PRIMARY KEY
/// - client_id / reader_id: BIGINT NOT NULL (immutable after creation)
/// - modality: session_modality NOT NULL
/// - rate_cents_per_minute: BIGINT NOT NULL -- frozen at creation
/// - state: session_state NOT NULL DEFAULT 'pending'
/// - close_reason: VARCHAR(32) NULL
/// - billed_seconds / charged_cents / reader_credited_cents: BIGINT accumulators
/// - created_at / accepted_at / started_at / ended_at: TIMESTAMPTZ
/// - last_tick_at: TIMESTAMPTZ NULL -- durable billing watermark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// UUID primary key
    pub id: Uuid,

    /// Paying participant
    pub client_id: i64,

    /// Service-providing participant
    pub reader_id: i64,

    /// Consultation modality, immutable once out of `pending`
    pub modality: Modality,

    /// Agreed per-minute rate in cents, frozen at creation so mid-session
    /// rate changes on the reader profile never affect an active bill
    pub rate_cents_per_minute: i64,

    /// Current lifecycle state
    pub state: SessionState,

    /// Why the session closed (None until terminal)
    pub close_reason: Option<CloseReason>,

    /// Total seconds of billed connection time
    pub billed_seconds: i64,

    /// Total cents charged to the client; always equals the sum over this
    /// session's billing events
    pub charged_cents: i64,

    /// Total cents credited to the reader
    pub reader_credited_cents: i64,

    /// When the session was requested
    pub created_at: DateTime<Utc>,

    /// When the reader accepted (None before)
    pub accepted_at: Option<DateTime<Utc>>,

    /// First healthy link establishment (None before active)
    pub started_at: Option<DateTime<Utc>>,

    /// When the session reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Last successful billing tick; lets a restarted process finalize
    /// orphaned sessions with exact totals
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new pending session.
    pub fn new(client_id: i64, reader_id: i64, modality: Modality, rate_cents_per_minute: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            reader_id,
            modality,
            rate_cents_per_minute,
            state: SessionState::Pending,
            close_reason: None,
            billed_seconds: 0,
            charged_cents: 0,
            reader_credited_cents: 0,
            created_at: Utc::now(),
            accepted_at: None,
            started_at: None,
            ended_at: None,
            last_tick_at: None,
        }
    }

    /// The role `user_id` plays in this session, if any.
    pub fn role_of(&self, user_id: i64) -> Option<Participant> {
        if user_id == self.client_id {
            Some(Participant::Client)
        } else if user_id == self.reader_id {
            Some(Participant::Reader)
        } else {
            None
        }
    }

    /// Whether `user_id` is one of the two participants.
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.role_of(user_id).is_some()
    }

    /// The other participant's user id.
    pub fn counterpart_of(&self, user_id: i64) -> Option<i64> {
        match self.role_of(user_id)? {
            Participant::Client => Some(self.reader_id),
            Participant::Reader => Some(self.client_id),
        }
    }

    /// Whether the session has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the relay accepts signals for this session.
    pub fn accepts_signals(&self) -> bool {
        matches!(self.state, SessionState::Accepted | SessionState::Active)
    }
}

/// Repository trait for Session data access operations.
///
/// All state transitions are compare-and-swap: they only apply when the row
/// is still in the expected source state and return `None` when the state
/// has already advanced, so racing writers observe exactly one winner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new pending session.
    async fn create(&self, session: &Session) -> Result<Session, AppError>;

    /// Find a session by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// CAS `pending -> accepted`, setting `accepted_at`.
    async fn mark_accepted(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// CAS `pending -> rejected`, setting `ended_at`.
    async fn mark_rejected(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// CAS `pending|accepted -> cancelled` with the given reason.
    async fn mark_cancelled(
        &self,
        id: Uuid,
        reason: CancelReason,
    ) -> Result<Option<Session>, AppError>;

    /// CAS `accepted -> active`, setting `started_at`.
    async fn mark_active(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// CAS `active -> ended` with the given reason, setting `ended_at`.
    /// Accumulators are left untouched; they are maintained tick-by-tick.
    async fn mark_ended(&self, id: Uuid, reason: EndReason)
        -> Result<Option<Session>, AppError>;

    /// All sessions currently in `state` (boot recovery scan).
    async fn find_in_state(&self, state: SessionState) -> Result<Vec<Session>, AppError>;
}
