//! ReaderProfile entity and repository trait.
//!
//! Maps to the `reader_profiles` table. Only the two fields the session
//! engine needs live here: whether the reader currently accepts sessions,
//! and the listed per-minute rate frozen onto each session at creation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A reader's availability and listed rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderProfile {
    pub user_id: i64,
    pub accepting_sessions: bool,
    pub rate_cents_per_minute: i64,
    pub updated_at: DateTime<Utc>,
}

/// Repository trait for reader profile access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReaderRepository: Send + Sync {
    /// Find a reader's profile.
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<ReaderProfile>, AppError>;

    /// Update availability and/or rate; returns the updated profile, or
    /// None when the reader has no profile yet.
    async fn update(
        &self,
        user_id: i64,
        accepting_sessions: Option<bool>,
        rate_cents_per_minute: Option<i64>,
    ) -> Result<Option<ReaderProfile>, AppError>;
}
