//! Session Repository Implementation
//!
//! PostgreSQL implementation of session persistence. Every state
//! transition is a compare-and-swap `UPDATE ... WHERE state = ...`, so
//! concurrent writers racing for the same transition see exactly one
//! winner; losers get no row back and must re-read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    CancelReason, CloseReason, EndReason, Modality, Session, SessionRepository, SessionState,
};
use crate::shared::error::AppError;

/// PostgreSQL session repository implementation.
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Creates a new PgSessionRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Columns fetched for every session query.
const SESSION_COLUMNS: &str = r#"
    id, client_id, reader_id, modality::text as modality,
    rate_cents_per_minute, state::text as state, close_reason,
    billed_seconds, charged_cents, reader_credited_cents,
    created_at, accepted_at, started_at, ended_at, last_tick_at
"#;

/// Internal row type for session queries.
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    client_id: i64,
    reader_id: i64,
    modality: String,
    rate_cents_per_minute: i64,
    state: String,
    close_reason: Option<String>,
    billed_seconds: i64,
    charged_cents: i64,
    reader_credited_cents: i64,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_tick_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    /// Converts database row to domain Session entity.
    fn into_session(self) -> Result<Session, AppError> {
        let modality = Modality::from_str(&self.modality)
            .ok_or_else(|| AppError::Internal(format!("Unknown modality: {}", self.modality)))?;
        let state = SessionState::from_str(&self.state)
            .ok_or_else(|| AppError::Internal(format!("Unknown session state: {}", self.state)))?;
        Ok(Session {
            id: self.id,
            client_id: self.client_id,
            reader_id: self.reader_id,
            modality,
            rate_cents_per_minute: self.rate_cents_per_minute,
            state,
            close_reason: self.close_reason.as_deref().and_then(CloseReason::from_str),
            billed_seconds: self.billed_seconds,
            charged_cents: self.charged_cents,
            reader_credited_cents: self.reader_credited_cents,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_tick_at: self.last_tick_at,
        })
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO sessions (id, client_id, reader_id, modality, rate_cents_per_minute)
            VALUES ($1, $2, $3, $4::session_modality, $5)
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(session.id)
        .bind(session.client_id)
        .bind(session.reader_id)
        .bind(session.modality.as_str())
        .bind(session.rate_cents_per_minute)
        .fetch_one(&self.pool)
        .await?;

        row.into_session()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn mark_accepted(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions
            SET state = 'accepted', accepted_at = NOW()
            WHERE id = $1 AND state = 'pending'
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn mark_rejected(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions
            SET state = 'rejected', ended_at = NOW()
            WHERE id = $1 AND state = 'pending'
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        reason: CancelReason,
    ) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions
            SET state = 'cancelled', close_reason = $2, ended_at = NOW()
            WHERE id = $1 AND state IN ('pending', 'accepted')
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(reason.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn mark_active(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions
            SET state = 'active', started_at = NOW()
            WHERE id = $1 AND state = 'accepted'
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn mark_ended(
        &self,
        id: Uuid,
        reason: EndReason,
    ) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE sessions
            SET state = 'ended', close_reason = $2, ended_at = NOW()
            WHERE id = $1 AND state = 'active'
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(reason.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn find_in_state(&self, state: SessionState) -> Result<Vec<Session>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE state = $1::session_state
            ORDER BY created_at
            "#,
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
