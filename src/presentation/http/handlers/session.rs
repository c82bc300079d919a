//! Session Handlers
//!
//! Request handlers for the session orchestrator surface.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::application::dto::request::{
    EndSessionRequest, RequestSessionRequest, RespondToSessionRequest,
};
use crate::application::dto::response::SessionResponse;
use crate::application::services::{SessionError, SessionService, SessionServiceImpl};
use crate::infrastructure::cache::AvailabilityCache;
use crate::infrastructure::repositories::{
    PgReaderRepository, PgSessionRepository, PgWalletRepository,
};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Build the orchestrator service from application state.
/// Also used by the WebSocket handler to route gateway heartbeats.
pub(crate) fn session_service(
    state: &AppState,
) -> SessionServiceImpl<PgSessionRepository, PgWalletRepository, PgReaderRepository> {
    let availability_cache = AvailabilityCache::new(
        state.redis.clone(),
        state.settings.redis.availability_ttl_secs,
    );

    SessionServiceImpl::new(
        Arc::new(PgSessionRepository::new(state.db.clone())),
        Arc::new(PgWalletRepository::new(state.db.clone())),
        Arc::new(PgReaderRepository::new(state.db.clone())),
        state.registry.clone(),
        state.billing.clone(),
        state.monitor.clone(),
        state.gateway.clone(),
        Some(availability_cache),
        state.settings.timeouts.clone(),
    )
}

pub(crate) fn map_session_error(e: SessionError) -> AppError {
    match e {
        SessionError::NotFound => AppError::NotFound("Session not found".into()),
        SessionError::NotParticipant => {
            AppError::Forbidden("Caller is not a session participant".into())
        }
        SessionError::NotPending => AppError::Conflict("Session is no longer pending".into()),
        SessionError::InvalidState { state } => {
            AppError::Conflict(format!("Action not valid in state {}", state))
        }
        SessionError::InsufficientBalance {
            required_cents,
            balance_cents,
        } => AppError::InsufficientBalance(format!(
            "Balance of {} cents cannot cover the {} cents required to start",
            balance_cents, required_cents
        )),
        SessionError::ReaderUnavailable => {
            AppError::Conflict("Reader is not accepting sessions".into())
        }
        SessionError::RateChanged { current_rate_cents } => AppError::Conflict(format!(
            "Reader rate is now {} cents per minute",
            current_rate_cents
        )),
        SessionError::Validation(msg) => AppError::BadRequest(msg),
        SessionError::Internal(msg) => AppError::Internal(msg),
    }
}

/// Request a session with a reader
pub async fn create_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<RequestSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let session = session_service(&state)
        .request_session(auth.user_id, body)
        .await
        .map_err(map_session_error)?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// Reader accepts or rejects a pending session
pub async fn respond_to_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<RespondToSessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = session_service(&state)
        .respond(session_id, auth.user_id, body.action)
        .await
        .map_err(map_session_error)?;

    Ok(Json(SessionResponse::from(session)))
}

/// A participant signals link readiness
pub async fn ready(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = session_service(&state)
        .begin_link(session_id, auth.user_id)
        .await
        .map_err(map_session_error)?;

    Ok(Json(SessionResponse::from(session)))
}

/// Poll-mode heartbeat fallback
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    session_service(&state)
        .heartbeat(session_id, auth.user_id)
        .await
        .map_err(map_session_error)?;

    Ok(StatusCode::OK)
}

/// End (or cancel) a session
pub async fn end_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    body: Option<Json<EndSessionRequest>>,
) -> Result<Json<SessionResponse>, AppError> {
    // The reason is derived from the caller's role; an explicit body
    // reason is accepted but informational only
    if let Some(Json(request)) = &body {
        if let Some(reason) = &request.reason {
            tracing::debug!(session_id = %session_id, reason, "End requested");
        }
    }

    let session = session_service(&state)
        .end(session_id, auth.user_id)
        .await
        .map_err(map_session_error)?;

    Ok(Json(SessionResponse::from(session)))
}

/// Current state and accumulators
pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = session_service(&state)
        .get(session_id, auth.user_id)
        .await
        .map_err(map_session_error)?;

    Ok(Json(SessionResponse::from(session)))
}
