//! Billing Repository Implementation
//!
//! PostgreSQL implementation of the exactly-once billing tick.
//!
//! The whole tick is one transaction. Lock order matters and is the same
//! on every path: session row first (serializes ticks against the end
//! transition), then the client wallet row (serializes balance mutations
//! per user, even across sessions). The sequence number is computed inside
//! the transaction, so a retried tick can neither skip nor duplicate one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{BillingEvent, BillingRepository, ChargeCommand, ChargeOutcome};
use crate::shared::error::AppError;

/// PostgreSQL billing repository implementation.
pub struct PgBillingRepository {
    pool: PgPool,
}

impl PgBillingRepository {
    /// Creates a new PgBillingRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for billing event queries.
#[derive(Debug, sqlx::FromRow)]
struct BillingEventRow {
    id: Uuid,
    session_id: Uuid,
    seq: i32,
    amount_cents: i64,
    balance_before_cents: i64,
    balance_after_cents: i64,
    reader_credit_cents: i64,
    platform_fee_cents: i64,
    created_at: DateTime<Utc>,
}

impl BillingEventRow {
    fn into_billing_event(self) -> BillingEvent {
        BillingEvent {
            id: self.id,
            session_id: self.session_id,
            seq: self.seq,
            amount_cents: self.amount_cents,
            balance_before_cents: self.balance_before_cents,
            balance_after_cents: self.balance_after_cents,
            reader_credit_cents: self.reader_credit_cents,
            platform_fee_cents: self.platform_fee_cents,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl BillingRepository for PgBillingRepository {
    async fn apply_charge(&self, command: &ChargeCommand) -> Result<ChargeOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock the session row; a session that already left `active` must
        // not be charged, however the race interleaved.
        let state: Option<(String,)> =
            sqlx::query_as("SELECT state::text FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(command.session_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((state,)) = state else {
            return Ok(ChargeOutcome::SessionNotActive);
        };
        if state != "active" {
            return Ok(ChargeOutcome::SessionNotActive);
        }

        // Wallet rows must exist before they can be locked
        for user_id in [command.client_id, command.reader_id] {
            sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        // Lock the client wallet row: the per-user serialization point
        let (balance_before,): (i64,) =
            sqlx::query_as("SELECT balance_cents FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(command.client_id)
                .fetch_one(&mut *tx)
                .await?;

        if balance_before < command.amount_cents {
            // Dropping the transaction rolls everything back; the
            // incomplete interval is not charged (no proration)
            return Ok(ChargeOutcome::InsufficientBalance {
                balance_cents: balance_before,
            });
        }

        sqlx::query(
            "UPDATE wallets SET balance_cents = balance_cents - $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(command.client_id)
        .bind(command.amount_cents)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE wallets SET earned_cents = earned_cents + $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(command.reader_id)
        .bind(command.reader_credit_cents)
        .execute(&mut *tx)
        .await?;

        // Next gap-free sequence number; the session row lock serializes
        // this against concurrent ticks, and UNIQUE (session_id, seq)
        // backs it at the schema level
        let (seq,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM billing_events WHERE session_id = $1",
        )
        .bind(command.session_id)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, BillingEventRow>(
            r#"
            INSERT INTO billing_events
                (id, session_id, seq, amount_cents, balance_before_cents,
                 balance_after_cents, reader_credit_cents, platform_fee_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, session_id, seq, amount_cents, balance_before_cents,
                      balance_after_cents, reader_credit_cents, platform_fee_cents,
                      created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(command.session_id)
        .bind(seq)
        .bind(command.amount_cents)
        .bind(balance_before)
        .bind(balance_before - command.amount_cents)
        .bind(command.reader_credit_cents)
        .bind(command.platform_fee_cents)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE sessions
            SET billed_seconds = billed_seconds + $2,
                charged_cents = charged_cents + $3,
                reader_credited_cents = reader_credited_cents + $4,
                last_tick_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(command.session_id)
        .bind(command.interval_secs)
        .bind(command.amount_cents)
        .bind(command.reader_credit_cents)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ChargeOutcome::Applied(row.into_billing_event()))
    }

    async fn events_for_session(&self, session_id: Uuid) -> Result<Vec<BillingEvent>, AppError> {
        let rows = sqlx::query_as::<_, BillingEventRow>(
            r#"
            SELECT id, session_id, seq, amount_cents, balance_before_cents,
                   balance_after_cents, reader_credit_cents, platform_fee_cents,
                   created_at
            FROM billing_events
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(BillingEventRow::into_billing_event)
            .collect())
    }
}
