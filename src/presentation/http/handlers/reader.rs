//! Reader Handlers
//!
//! Availability and rate management for readers, plus the public
//! availability lookup clients use before requesting a session.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use validator::Validate;

use crate::application::dto::request::UpdateReaderRequest;
use crate::application::dto::response::ReaderResponse;
use crate::domain::ReaderRepository;
use crate::infrastructure::cache::AvailabilityCache;
use crate::infrastructure::repositories::PgReaderRepository;
use crate::presentation::middleware::{AuthUser, UserRole};
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Get a reader's availability and listed rate
pub async fn get_reader(
    State(state): State<AppState>,
    Path(reader_id): Path<i64>,
) -> Result<Json<ReaderResponse>, AppError> {
    let profile = PgReaderRepository::new(state.db.clone())
        .find_by_user_id(reader_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reader not found".into()))?;

    Ok(Json(ReaderResponse::from(profile)))
}

/// Update the caller's availability and/or rate
pub async fn update_reader(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<UpdateReaderRequest>,
) -> Result<Json<ReaderResponse>, AppError> {
    if auth.role != UserRole::Reader {
        return Err(AppError::Forbidden("Caller is not a reader".into()));
    }

    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let profile = PgReaderRepository::new(state.db.clone())
        .update(auth.user_id, body.accepting_sessions, body.rate_cents_per_minute)
        .await?
        .ok_or_else(|| AppError::NotFound("Reader profile not found".into()))?;

    // Stale availability on the request hot path would accept or refuse
    // sessions against outdated state
    let cache = AvailabilityCache::new(
        state.redis.clone(),
        state.settings.redis.availability_ttl_secs,
    );
    if let Err(e) = cache.invalidate(auth.user_id).await {
        tracing::warn!(reader_id = auth.user_id, error = %e, "Cache invalidation failed");
    }

    Ok(Json(ReaderResponse::from(profile)))
}
