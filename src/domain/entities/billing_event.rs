//! BillingEvent entity, charge arithmetic, and the billing repository trait.
//!
//! Maps to the `billing_events` table in the database schema.
//! One row per applied billing interval; rows are immutable and their
//! per-session sequence numbers are gap-free and strictly increasing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// One immutable per-interval charge record.
///
/// Maps to the `billing_events` table:
/// - id: UUID PRIMARY KEY
/// - session_id: UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE
/// - seq: INT NOT NULL -- 1-based, UNIQUE (session_id, seq)
/// - amount_cents / reader_credit_cents / platform_fee_cents: BIGINT NOT NULL
/// - balance_before_cents / balance_after_cents: BIGINT NOT NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: Uuid,
    pub session_id: Uuid,

    /// Monotonic per-session sequence number, starting at 1
    pub seq: i32,

    /// Cents debited from the client for this interval
    pub amount_cents: i64,

    /// Client balance immediately before the debit
    pub balance_before_cents: i64,

    /// Client balance immediately after the debit
    pub balance_after_cents: i64,

    /// Cents credited to the reader's earnings
    pub reader_credit_cents: i64,

    /// Remainder retained by the platform
    pub platform_fee_cents: i64,

    pub created_at: DateTime<Utc>,
}

/// The charge for one billing interval, rounded up.
///
/// `ceil(rate_cents_per_minute * interval_secs / 60)`: partial cents always
/// round against the client, matching the platform's charging policy.
pub fn interval_charge_cents(rate_cents_per_minute: i64, interval_secs: u64) -> i64 {
    let numerator = rate_cents_per_minute * interval_secs as i64;
    (numerator + 59) / 60
}

/// Split a charge into (reader credit, platform fee).
///
/// The reader credit rounds down; the platform keeps the remainder, so the
/// two parts always sum to the full charge.
pub fn split_charge(charge_cents: i64, reader_share_percent: i64) -> (i64, i64) {
    let reader_credit = charge_cents * reader_share_percent / 100;
    (reader_credit, charge_cents - reader_credit)
}

/// Everything needed to apply one tick atomically.
#[derive(Debug, Clone)]
pub struct ChargeCommand {
    pub session_id: Uuid,
    pub client_id: i64,
    pub reader_id: i64,

    /// Cents to debit this interval
    pub amount_cents: i64,

    /// Cents of the amount credited to the reader
    pub reader_credit_cents: i64,

    /// Cents of the amount retained by the platform
    pub platform_fee_cents: i64,

    /// Seconds of billed connection time this interval represents
    pub interval_secs: i64,
}

/// Result of attempting to apply one tick.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    /// The tick was applied atomically; the recorded event is returned.
    Applied(BillingEvent),

    /// The client balance could not cover the charge; nothing was mutated.
    InsufficientBalance { balance_cents: i64 },

    /// The session left `active` before the tick committed; nothing was
    /// mutated. Covers the race between an explicit end and an in-flight tick.
    SessionNotActive,
}

/// Repository trait for billing operations.
///
/// `apply_charge` is the exactly-once tick primitive: one database
/// transaction that locks the client wallet row (serializing balance
/// mutations per user), verifies the balance, debits the client, credits
/// the reader, inserts the billing event with `seq = last + 1`, and updates
/// the session accumulators and tick watermark. No partial application is
/// ever visible to a concurrent balance reader.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingRepository: Send + Sync {
    /// Atomically apply one billing tick, or report insufficient balance.
    async fn apply_charge(&self, command: &ChargeCommand) -> Result<ChargeOutcome, AppError>;

    /// All events for a session in sequence order.
    async fn events_for_session(&self, session_id: Uuid) -> Result<Vec<BillingEvent>, AppError>;
}
