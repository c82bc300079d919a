//! Session Service
//!
//! The session orchestrator: owns the state machine, coordinates the
//! relay, monitor, and billing engine, and is the only component exposed
//! to request/response callers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::application::dto::request::{RequestSessionRequest, RespondAction};
use crate::application::dto::response::SessionResponse;
use crate::application::services::billing_service::BillingEngine;
use crate::config::TimeoutSettings;
use crate::domain::{
    CancelReason, EndReason, Participant, ReaderProfile, ReaderRepository, Session,
    SessionRepository, SessionState, WalletRepository,
};
use crate::infrastructure::cache::AvailabilityCache;
use crate::infrastructure::metrics;
use crate::presentation::websocket::gateway::{Gateway, GatewayEvent};
use crate::runtime::monitor::{ConnectionMonitor, LinkHealth};
use crate::runtime::registry::SessionRegistry;

/// Session orchestrator trait
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a pending session from a client's request
    async fn request_session(
        &self,
        client_id: i64,
        request: RequestSessionRequest,
    ) -> Result<Session, SessionError>;

    /// Reader accepts or rejects a pending session
    async fn respond(
        &self,
        session_id: Uuid,
        reader_id: i64,
        action: RespondAction,
    ) -> Result<Session, SessionError>;

    /// A participant signals link readiness; activates the session once
    /// both are ready and the link is healthy. Idempotent after `active`.
    async fn begin_link(&self, session_id: Uuid, user_id: i64) -> Result<Session, SessionError>;

    /// Record a participant heartbeat (poll-mode fallback and gateway path)
    async fn heartbeat(&self, session_id: Uuid, user_id: i64) -> Result<(), SessionError>;

    /// End or cancel a session on behalf of a participant. Safe to race
    /// with the billing loop: every caller observes the same terminal
    /// session.
    async fn end(&self, session_id: Uuid, user_id: i64) -> Result<Session, SessionError>;

    /// Current state and accumulators; participants only
    async fn get(&self, session_id: Uuid, user_id: i64) -> Result<Session, SessionError>;
}

/// Session service errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Caller is not a session participant")]
    NotParticipant,

    #[error("Session is no longer pending")]
    NotPending,

    #[error("Action not valid in state {state}")]
    InvalidState { state: &'static str },

    #[error("Insufficient balance: {required_cents} cents required, {balance_cents} available")]
    InsufficientBalance {
        required_cents: i64,
        balance_cents: i64,
    },

    #[error("Reader is not accepting sessions")]
    ReaderUnavailable,

    #[error("Reader rate is now {current_rate_cents} cents per minute")]
    RateChanged { current_rate_cents: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// SessionService implementation
pub struct SessionServiceImpl<S, W, R>
where
    S: SessionRepository,
    W: WalletRepository,
    R: ReaderRepository,
{
    session_repo: Arc<S>,
    wallet_repo: Arc<W>,
    reader_repo: Arc<R>,
    registry: Arc<SessionRegistry>,
    billing: Arc<BillingEngine>,
    monitor: Arc<ConnectionMonitor>,
    gateway: Arc<Gateway>,
    availability_cache: Option<AvailabilityCache>,
    timeouts: TimeoutSettings,
}

impl<S, W, R> SessionServiceImpl<S, W, R>
where
    S: SessionRepository + 'static,
    W: WalletRepository + 'static,
    R: ReaderRepository + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_repo: Arc<S>,
        wallet_repo: Arc<W>,
        reader_repo: Arc<R>,
        registry: Arc<SessionRegistry>,
        billing: Arc<BillingEngine>,
        monitor: Arc<ConnectionMonitor>,
        gateway: Arc<Gateway>,
        availability_cache: Option<AvailabilityCache>,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            session_repo,
            wallet_repo,
            reader_repo,
            registry,
            billing,
            monitor,
            gateway,
            availability_cache,
            timeouts,
        }
    }

    /// Finalize sessions a previous process left in flight. Active
    /// sessions are ended with exact totals (accumulators are durable to
    /// the last tick); accepted ones are cancelled; pending ones get a
    /// fresh response timeout.
    pub async fn recover_on_boot(&self) -> Result<(), SessionError> {
        let orphans = self
            .session_repo
            .find_in_state(SessionState::Active)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        for session in orphans {
            tracing::warn!(session_id = %session.id, "Finalizing orphaned active session");
            metrics::ACTIVE_SESSIONS.inc();
            self.registry
                .finalize(session.id, EndReason::Error)
                .await
                .map_err(|e| SessionError::Internal(e.to_string()))?;
        }

        let stuck = self
            .session_repo
            .find_in_state(SessionState::Accepted)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        for session in stuck {
            tracing::warn!(session_id = %session.id, "Cancelling orphaned accepted session");
            if let Some(cancelled) = self
                .session_repo
                .mark_cancelled(session.id, CancelReason::SetupTimeout)
                .await
                .map_err(|e| SessionError::Internal(e.to_string()))?
            {
                self.registry.teardown(cancelled.id).await;
                self.notify_participants("SESSION_CANCELLED", &cancelled);
            }
        }

        let waiting = self
            .session_repo
            .find_in_state(SessionState::Pending)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        for session in waiting {
            self.arm_pending_timeout(session.id);
        }

        Ok(())
    }

    async fn reader_profile(&self, reader_id: i64) -> Result<Option<ReaderProfile>, SessionError> {
        if let Some(cache) = &self.availability_cache {
            match cache.get(reader_id).await {
                Ok(Some(profile)) => return Ok(Some(profile)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(reader_id, error = %e, "Availability cache read failed");
                }
            }
        }

        let profile = self
            .reader_repo
            .find_by_user_id(reader_id)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?;

        if let (Some(cache), Some(profile)) = (&self.availability_cache, &profile) {
            if let Err(e) = cache.set(profile).await {
                tracing::warn!(reader_id, error = %e, "Availability cache write failed");
            }
        }

        Ok(profile)
    }

    /// CAS `accepted -> active` once both sides are ready and the link is
    /// healthy, then start billing. Returns the active session when the
    /// session is (or just became) active.
    async fn try_activate(&self, session_id: Uuid) -> Result<Option<Session>, SessionError> {
        if !self.registry.both_ready(session_id) {
            return Ok(None);
        }
        if self.monitor.health(session_id) != Some(LinkHealth::Healthy) {
            return Ok(None);
        }

        match self
            .session_repo
            .mark_active(session_id)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?
        {
            Some(active) => {
                metrics::ACTIVE_SESSIONS.inc();
                self.billing.start(&active);
                self.notify_participants("SESSION_STARTED", &active);
                tracing::info!(session_id = %session_id, "Session activated");
                Ok(Some(active))
            }
            None => {
                // Lost the activation race; the winner started billing
                let session = self.find(session_id).await?;
                if session.state == SessionState::Active {
                    Ok(Some(session))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn arm_pending_timeout(&self, session_id: Uuid) {
        let session_repo = self.session_repo.clone();
        let registry = self.registry.clone();
        let gateway = self.gateway.clone();
        let timeout = Duration::from_secs(self.timeouts.pending_secs);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            match session_repo
                .mark_cancelled(session_id, CancelReason::ReaderUnresponsive)
                .await
            {
                Ok(Some(cancelled)) => {
                    tracing::info!(session_id = %session_id, "Reader unresponsive; session cancelled");
                    registry.teardown(session_id).await;
                    dispatch_to_participants(&gateway, "SESSION_CANCELLED", &cancelled);
                }
                Ok(None) => {} // reader responded in time
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Pending timeout failed");
                }
            }
        });
    }

    fn arm_setup_timeout(&self, session_id: Uuid) {
        let session_repo = self.session_repo.clone();
        let registry = self.registry.clone();
        let gateway = self.gateway.clone();
        let timeout = Duration::from_secs(self.timeouts.setup_secs);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            match session_repo
                .mark_cancelled(session_id, CancelReason::SetupTimeout)
                .await
            {
                Ok(Some(cancelled)) => {
                    tracing::info!(session_id = %session_id, "Link setup timed out; session cancelled");
                    registry.teardown(session_id).await;
                    dispatch_to_participants(&gateway, "SESSION_CANCELLED", &cancelled);
                }
                Ok(None) => {} // reached active (or another terminal state) in time
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Setup timeout failed");
                }
            }
        });
    }

    async fn find(&self, session_id: Uuid) -> Result<Session, SessionError> {
        self.session_repo
            .find_by_id(session_id)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?
            .ok_or(SessionError::NotFound)
    }

    fn notify_participants(&self, event_name: &str, session: &Session) {
        dispatch_to_participants(&self.gateway, event_name, session);
    }
}

fn dispatch_to_participants(gateway: &Gateway, event_name: &str, session: &Session) {
    gateway.dispatch_to_users(
        GatewayEvent::session_event(event_name, SessionResponse::from(session.clone())),
        vec![session.client_id, session.reader_id],
    );
}

#[async_trait]
impl<S, W, R> SessionService for SessionServiceImpl<S, W, R>
where
    S: SessionRepository + 'static,
    W: WalletRepository + 'static,
    R: ReaderRepository + 'static,
{
    async fn request_session(
        &self,
        client_id: i64,
        request: RequestSessionRequest,
    ) -> Result<Session, SessionError> {
        if request.reader_id == client_id {
            return Err(SessionError::Validation(
                "Cannot request a session with yourself".into(),
            ));
        }

        let profile = self
            .reader_profile(request.reader_id)
            .await?
            .ok_or(SessionError::ReaderUnavailable)?;
        if !profile.accepting_sessions {
            return Err(SessionError::ReaderUnavailable);
        }
        if profile.rate_cents_per_minute != request.rate_cents_per_minute {
            return Err(SessionError::RateChanged {
                current_rate_cents: profile.rate_cents_per_minute,
            });
        }

        let required_cents = self.billing.minimum_balance(profile.rate_cents_per_minute);
        let wallet = self
            .wallet_repo
            .find_or_create(client_id)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        if wallet.balance_cents < required_cents {
            return Err(SessionError::InsufficientBalance {
                required_cents,
                balance_cents: wallet.balance_cents,
            });
        }

        let session = Session::new(
            client_id,
            request.reader_id,
            request.modality,
            profile.rate_cents_per_minute,
        );
        let created = self
            .session_repo
            .create(&session)
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?;

        self.arm_pending_timeout(created.id);

        self.gateway.dispatch_to_users(
            GatewayEvent::session_event(
                "SESSION_REQUESTED",
                SessionResponse::from(created.clone()),
            ),
            vec![created.reader_id],
        );

        tracing::info!(
            session_id = %created.id,
            client_id,
            reader_id = created.reader_id,
            rate_cents = created.rate_cents_per_minute,
            modality = %created.modality,
            "Session requested"
        );

        Ok(created)
    }

    async fn respond(
        &self,
        session_id: Uuid,
        reader_id: i64,
        action: RespondAction,
    ) -> Result<Session, SessionError> {
        let session = self.find(session_id).await?;
        if session.reader_id != reader_id {
            return Err(SessionError::NotParticipant);
        }

        match action {
            RespondAction::Accept => {
                let accepted = self
                    .session_repo
                    .mark_accepted(session_id)
                    .await
                    .map_err(|e| SessionError::Internal(e.to_string()))?
                    .ok_or(SessionError::NotPending)?;

                self.registry.register(&accepted);
                self.arm_setup_timeout(accepted.id);
                self.gateway.dispatch_to_users(
                    GatewayEvent::session_event(
                        "SESSION_ACCEPTED",
                        SessionResponse::from(accepted.clone()),
                    ),
                    vec![accepted.client_id],
                );
                tracing::info!(session_id = %session_id, "Session accepted");
                Ok(accepted)
            }
            RespondAction::Reject => {
                let rejected = self
                    .session_repo
                    .mark_rejected(session_id)
                    .await
                    .map_err(|e| SessionError::Internal(e.to_string()))?
                    .ok_or(SessionError::NotPending)?;

                self.gateway.dispatch_to_users(
                    GatewayEvent::session_event(
                        "SESSION_REJECTED",
                        SessionResponse::from(rejected.clone()),
                    ),
                    vec![rejected.client_id],
                );
                tracing::info!(session_id = %session_id, "Session rejected");
                Ok(rejected)
            }
        }
    }

    async fn begin_link(&self, session_id: Uuid, user_id: i64) -> Result<Session, SessionError> {
        let session = self.find(session_id).await?;
        let role = session
            .role_of(user_id)
            .ok_or(SessionError::NotParticipant)?;

        match session.state {
            // Repeated readiness signals after activation are no-ops
            SessionState::Active => Ok(session),
            SessionState::Accepted => {
                self.registry.mark_ready(session_id, role);
                Ok(self.try_activate(session_id).await?.unwrap_or(session))
            }
            state => Err(SessionError::InvalidState {
                state: state.as_str(),
            }),
        }
    }

    async fn heartbeat(&self, session_id: Uuid, user_id: i64) -> Result<(), SessionError> {
        let session = self.find(session_id).await?;
        let role = session
            .role_of(user_id)
            .ok_or(SessionError::NotParticipant)?;
        if session.is_terminal() {
            return Ok(());
        }

        let transition = self.monitor.heartbeat(session_id, role);

        // A heartbeat that restores health may complete link establishment
        if transition == Some(LinkHealth::Healthy) && session.state == SessionState::Accepted {
            let _ = self.try_activate(session_id).await?;
        }

        Ok(())
    }

    async fn end(&self, session_id: Uuid, user_id: i64) -> Result<Session, SessionError> {
        let session = self.find(session_id).await?;
        let role = session
            .role_of(user_id)
            .ok_or(SessionError::NotParticipant)?;

        match session.state {
            SessionState::Pending | SessionState::Accepted => {
                let reason = match role {
                    Participant::Client => CancelReason::ClientCancelled,
                    Participant::Reader => CancelReason::ReaderCancelled,
                };
                match self
                    .session_repo
                    .mark_cancelled(session_id, reason)
                    .await
                    .map_err(|e| SessionError::Internal(e.to_string()))?
                {
                    Some(cancelled) => {
                        self.registry.teardown(session_id).await;
                        self.notify_participants("SESSION_CANCELLED", &cancelled);
                        tracing::info!(
                            session_id = %session_id,
                            reason = reason.as_str(),
                            "Session cancelled"
                        );
                        Ok(cancelled)
                    }
                    // Lost a race against another closer; converge on its result
                    None => {
                        let session = self.find(session_id).await?;
                        if session.is_terminal() {
                            Ok(session)
                        } else {
                            Err(SessionError::InvalidState {
                                state: session.state.as_str(),
                            })
                        }
                    }
                }
            }
            SessionState::Active => {
                let reason = match role {
                    Participant::Client => EndReason::ClientRequested,
                    Participant::Reader => EndReason::ReaderRequested,
                };
                match self
                    .registry
                    .finalize(session_id, reason)
                    .await
                    .map_err(|e| SessionError::Internal(e.to_string()))?
                {
                    Some(ended) => Ok(ended),
                    // Lost the race (e.g. against balance depletion);
                    // report the same terminal outcome the winner produced
                    None => {
                        let session = self.find(session_id).await?;
                        if session.is_terminal() {
                            Ok(session)
                        } else {
                            Err(SessionError::InvalidState {
                                state: session.state.as_str(),
                            })
                        }
                    }
                }
            }
            // Ending an already-terminal session is a no-op returning the
            // finalized result
            SessionState::Ended | SessionState::Rejected | SessionState::Cancelled => Ok(session),
        }
    }

    async fn get(&self, session_id: Uuid, user_id: i64) -> Result<Session, SessionError> {
        let session = self.find(session_id).await?;
        if !session.is_participant(user_id) {
            return Err(SessionError::NotParticipant);
        }
        Ok(session)
    }
}
