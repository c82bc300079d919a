//! Signal Service
//!
//! The signaling relay: stores opaque handshake payloads and delivers each
//! one at most once per recipient. Delivery prefers the push channel (the
//! WebSocket gateway); undelivered messages wait for the polling fallback.
//! Both paths share this single business-logic implementation.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::application::dto::request::SendSignalRequest;
use crate::application::dto::response::SignalResponse;
use crate::domain::{SessionRepository, SignalMessage, SignalRepository};
use crate::infrastructure::metrics;
use crate::presentation::websocket::gateway::{Gateway, GatewayEvent};

/// Signal relay trait
#[async_trait]
pub trait SignalService: Send + Sync {
    /// Relay a signal from `sender_id` to the other participant
    async fn send(
        &self,
        session_id: Uuid,
        sender_id: i64,
        request: SendSignalRequest,
    ) -> Result<SignalMessage, SignalError>;

    /// Take all undelivered signals addressed to `recipient_id`, in
    /// creation order. Messages returned here are never returned again.
    async fn poll(
        &self,
        session_id: Uuid,
        recipient_id: i64,
    ) -> Result<Vec<SignalMessage>, SignalError>;
}

/// Signal relay errors
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Session not found")]
    NotFound,

    #[error("Sender and recipient must be distinct session participants")]
    NotParticipant,

    #[error("Signals are not accepted in state {state}")]
    InvalidState { state: &'static str },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// SignalService implementation
pub struct SignalServiceImpl<S, G>
where
    S: SessionRepository,
    G: SignalRepository,
{
    session_repo: Arc<S>,
    signal_repo: Arc<G>,
    gateway: Arc<Gateway>,
}

impl<S, G> SignalServiceImpl<S, G>
where
    S: SessionRepository,
    G: SignalRepository,
{
    pub fn new(session_repo: Arc<S>, signal_repo: Arc<G>, gateway: Arc<Gateway>) -> Self {
        Self {
            session_repo,
            signal_repo,
            gateway,
        }
    }
}

#[async_trait]
impl<S, G> SignalService for SignalServiceImpl<S, G>
where
    S: SessionRepository + 'static,
    G: SignalRepository + 'static,
{
    async fn send(
        &self,
        session_id: Uuid,
        sender_id: i64,
        request: SendSignalRequest,
    ) -> Result<SignalMessage, SignalError> {
        let session = self
            .session_repo
            .find_by_id(session_id)
            .await
            .map_err(|e| SignalError::Internal(e.to_string()))?
            .ok_or(SignalError::NotFound)?;

        if !session.is_participant(sender_id)
            || !session.is_participant(request.to_user)
            || sender_id == request.to_user
        {
            return Err(SignalError::NotParticipant);
        }
        if !session.accepts_signals() {
            return Err(SignalError::InvalidState {
                state: session.state.as_str(),
            });
        }

        let message = SignalMessage::new(
            session_id,
            sender_id,
            request.to_user,
            request.kind,
            request.payload,
        );
        let created = self
            .signal_repo
            .create(&message)
            .await
            .map_err(|e| SignalError::Internal(e.to_string()))?;

        // Push path: if the recipient has a live gateway connection, hand
        // the signal over immediately and mark it delivered so the polling
        // fallback never redelivers it. A push lost after this point is
        // recovered by renegotiation above the relay, not by retrying here.
        let event = GatewayEvent::signal(SignalResponse::from(created.clone()));
        if self.gateway.push_event_to_user(request.to_user, &event) {
            match self.signal_repo.mark_delivered(created.id).await {
                Ok(true) => {
                    metrics::SIGNALS_RELAYED_TOTAL
                        .with_label_values(&["push"])
                        .inc();
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        signal_id = %created.id,
                        error = %e,
                        "Failed to mark pushed signal delivered"
                    );
                }
            }
        }

        Ok(created)
    }

    async fn poll(
        &self,
        session_id: Uuid,
        recipient_id: i64,
    ) -> Result<Vec<SignalMessage>, SignalError> {
        let session = self
            .session_repo
            .find_by_id(session_id)
            .await
            .map_err(|e| SignalError::Internal(e.to_string()))?
            .ok_or(SignalError::NotFound)?;

        if !session.is_participant(recipient_id) {
            return Err(SignalError::NotParticipant);
        }

        let messages = self
            .signal_repo
            .take_undelivered(session_id, recipient_id)
            .await
            .map_err(|e| SignalError::Internal(e.to_string()))?;

        if !messages.is_empty() {
            metrics::SIGNALS_RELAYED_TOTAL
                .with_label_values(&["poll"])
                .inc_by(messages.len() as u64);
        }

        Ok(messages)
    }
}
