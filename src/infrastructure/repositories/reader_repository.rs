//! Reader Repository Implementation
//!
//! PostgreSQL implementation of reader profile access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{ReaderProfile, ReaderRepository};
use crate::shared::error::AppError;

/// PostgreSQL reader repository implementation.
pub struct PgReaderRepository {
    pool: PgPool,
}

impl PgReaderRepository {
    /// Creates a new PgReaderRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for reader profile queries.
#[derive(Debug, sqlx::FromRow)]
struct ReaderProfileRow {
    user_id: i64,
    accepting_sessions: bool,
    rate_cents_per_minute: i64,
    updated_at: DateTime<Utc>,
}

impl ReaderProfileRow {
    fn into_profile(self) -> ReaderProfile {
        ReaderProfile {
            user_id: self.user_id,
            accepting_sessions: self.accepting_sessions,
            rate_cents_per_minute: self.rate_cents_per_minute,
            updated_at: self.updated_at,
        }
    }
}

#[async_trait]
impl ReaderRepository for PgReaderRepository {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<ReaderProfile>, AppError> {
        let row = sqlx::query_as::<_, ReaderProfileRow>(
            r#"
            SELECT user_id, accepting_sessions, rate_cents_per_minute, updated_at
            FROM reader_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ReaderProfileRow::into_profile))
    }

    async fn update(
        &self,
        user_id: i64,
        accepting_sessions: Option<bool>,
        rate_cents_per_minute: Option<i64>,
    ) -> Result<Option<ReaderProfile>, AppError> {
        let row = sqlx::query_as::<_, ReaderProfileRow>(
            r#"
            UPDATE reader_profiles
            SET accepting_sessions = COALESCE($2, accepting_sessions),
                rate_cents_per_minute = COALESCE($3, rate_cents_per_minute),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, accepting_sessions, rate_cents_per_minute, updated_at
            "#,
        )
        .bind(user_id)
        .bind(accepting_sessions)
        .bind(rate_cents_per_minute)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ReaderProfileRow::into_profile))
    }
}
