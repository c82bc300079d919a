//! Signal Repository Implementation
//!
//! PostgreSQL implementation of the signaling relay storage. Delivery is
//! at-most-once: `take_undelivered` marks and returns in a single guarded
//! update, so two concurrent polls can never hand out the same message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{SignalKind, SignalMessage, SignalRepository};
use crate::shared::error::AppError;

/// PostgreSQL signal repository implementation.
pub struct PgSignalRepository {
    pool: PgPool,
}

impl PgSignalRepository {
    /// Creates a new PgSignalRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for signal queries.
#[derive(Debug, sqlx::FromRow)]
struct SignalRow {
    id: Uuid,
    session_id: Uuid,
    sender_id: i64,
    recipient_id: i64,
    kind: String,
    payload: serde_json::Value,
    delivered: bool,
    created_at: DateTime<Utc>,
}

impl SignalRow {
    fn into_signal(self) -> Result<SignalMessage, AppError> {
        let kind = SignalKind::from_str(&self.kind)
            .ok_or_else(|| AppError::Internal(format!("Unknown signal kind: {}", self.kind)))?;
        Ok(SignalMessage {
            id: self.id,
            session_id: self.session_id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            kind,
            payload: self.payload,
            delivered: self.delivered,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl SignalRepository for PgSignalRepository {
    async fn create(&self, message: &SignalMessage) -> Result<SignalMessage, AppError> {
        let row = sqlx::query_as::<_, SignalRow>(
            r#"
            INSERT INTO signal_messages (id, session_id, sender_id, recipient_id, kind, payload)
            VALUES ($1, $2, $3, $4, $5::signal_kind, $6)
            RETURNING id, session_id, sender_id, recipient_id, kind::text as kind,
                      payload, delivered, created_at
            "#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(message.kind.as_str())
        .bind(&message.payload)
        .fetch_one(&self.pool)
        .await?;

        row.into_signal()
    }

    async fn take_undelivered(
        &self,
        session_id: Uuid,
        recipient_id: i64,
    ) -> Result<Vec<SignalMessage>, AppError> {
        // Mark-and-return in one statement; SKIP LOCKED keeps two racing
        // polls from blocking on (or double-claiming) the same rows
        let rows = sqlx::query_as::<_, SignalRow>(
            r#"
            UPDATE signal_messages
            SET delivered = TRUE
            WHERE id IN (
                SELECT id FROM signal_messages
                WHERE session_id = $1 AND recipient_id = $2 AND delivered = FALSE
                ORDER BY id
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, session_id, sender_id, recipient_id, kind::text as kind,
                      payload, delivered, created_at
            "#,
        )
        .bind(session_id)
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified; v7 ids sort to creation order
        let mut messages = rows
            .into_iter()
            .map(SignalRow::into_signal)
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE signal_messages SET delivered = TRUE WHERE id = $1 AND delivered = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_session(&self, session_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM signal_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
