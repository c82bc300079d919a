//! Signal Handlers
//!
//! The polling surface of the signaling relay. The push path shares the
//! same service; these endpoints are the required fallback contract.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::application::dto::request::SendSignalRequest;
use crate::application::dto::response::SignalResponse;
use crate::application::services::{SignalError, SignalService, SignalServiceImpl};
use crate::infrastructure::repositories::{PgSessionRepository, PgSignalRepository};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

fn signal_service(
    state: &AppState,
) -> SignalServiceImpl<PgSessionRepository, PgSignalRepository> {
    SignalServiceImpl::new(
        Arc::new(PgSessionRepository::new(state.db.clone())),
        Arc::new(PgSignalRepository::new(state.db.clone())),
        state.gateway.clone(),
    )
}

fn map_signal_error(e: SignalError) -> AppError {
    match e {
        SignalError::NotFound => AppError::NotFound("Session not found".into()),
        SignalError::NotParticipant => {
            AppError::Forbidden("Sender and recipient must be distinct session participants".into())
        }
        SignalError::InvalidState { state } => {
            AppError::Conflict(format!("Signals are not accepted in state {}", state))
        }
        SignalError::Internal(msg) => AppError::Internal(msg),
    }
}

/// Relay a signal to the other participant
pub async fn send_signal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SendSignalRequest>,
) -> Result<StatusCode, AppError> {
    signal_service(&state)
        .send(session_id, auth.user_id, body)
        .await
        .map_err(map_signal_error)?;

    Ok(StatusCode::ACCEPTED)
}

/// Fetch the caller's undelivered signals (delivered-once)
pub async fn get_signals(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<SignalResponse>>, AppError> {
    let messages = signal_service(&state)
        .poll(session_id, auth.user_id)
        .await
        .map_err(map_signal_error)?;

    Ok(Json(messages.into_iter().map(SignalResponse::from).collect()))
}
