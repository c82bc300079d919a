//! Cache Module
//!
//! Redis-backed caching. The only cached value in this core is reader
//! availability: it is read on every session request, changes rarely, and
//! staleness is bounded by a short TTL plus invalidation on update.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisSettings;
use crate::domain::ReaderProfile;
use crate::shared::error::AppError;

/// Create a Redis connection manager
pub async fn create_redis_client(settings: &RedisSettings) -> Result<ConnectionManager, AppError> {
    let client = redis::Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    Ok(manager)
}

/// Short-TTL cache for reader availability lookups.
#[derive(Clone)]
pub struct AvailabilityCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl AvailabilityCache {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }

    fn key(reader_id: i64) -> String {
        format!("reader:availability:{}", reader_id)
    }

    /// Look up a cached profile.
    pub async fn get(&self, reader_id: i64) -> Result<Option<ReaderProfile>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(reader_id)).await?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(profile) => Ok(Some(profile)),
                Err(e) => {
                    tracing::warn!(reader_id, error = %e, "Dropping undecodable cache entry");
                    let _: () = conn.del(Self::key(reader_id)).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Cache a profile for the configured TTL.
    pub async fn set(&self, profile: &ReaderProfile) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(profile)
            .map_err(|e| AppError::Internal(format!("Cache serialization failed: {}", e)))?;
        let _: () = conn
            .set_ex(Self::key(profile.user_id), json, self.ttl_secs)
            .await?;
        Ok(())
    }

    /// Drop a cached profile after an availability or rate change.
    pub async fn invalidate(&self, reader_id: i64) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(reader_id)).await?;
        Ok(())
    }
}
