//! Session Registry
//!
//! Owns one runtime handle per non-terminal session that has been accepted:
//! the participants' readiness flags for link establishment and the cancel
//! channel that stops the session's billing loop. Handles are created on
//! acceptance and destroyed when the session reaches a terminal state, so
//! the registry never accumulates entries for dead sessions.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::application::dto::response::SessionResponse;
use crate::domain::{
    EndReason, Participant, Session, SessionRepository, SignalRepository,
};
use crate::infrastructure::metrics;
use crate::presentation::websocket::gateway::{Gateway, GatewayEvent};
use crate::runtime::monitor::ConnectionMonitor;
use crate::shared::error::AppError;

#[derive(Debug, Default, Clone, Copy)]
struct ReadyFlags {
    client: bool,
    reader: bool,
}

/// Runtime state for one live session.
struct SessionHandle {
    ready: Mutex<ReadyFlags>,
    cancel_tx: watch::Sender<bool>,
}

/// Registry of per-session runtime handles.
pub struct SessionRegistry {
    handles: DashMap<Uuid, Arc<SessionHandle>>,
    session_repo: Arc<dyn SessionRepository>,
    signal_repo: Arc<dyn SignalRepository>,
    monitor: Arc<ConnectionMonitor>,
    gateway: Arc<Gateway>,
}

impl SessionRegistry {
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        signal_repo: Arc<dyn SignalRepository>,
        monitor: Arc<ConnectionMonitor>,
        gateway: Arc<Gateway>,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            session_repo,
            signal_repo,
            monitor,
            gateway,
        }
    }

    /// Create the runtime handle for an accepted session and start tracking
    /// its link health.
    pub fn register(&self, session: &Session) {
        let (cancel_tx, _) = watch::channel(false);
        self.handles.insert(
            session.id,
            Arc::new(SessionHandle {
                ready: Mutex::new(ReadyFlags::default()),
                cancel_tx,
            }),
        );
        self.monitor
            .register(session.id, session.client_id, session.reader_id);
    }

    /// Whether a handle exists for the session.
    pub fn contains(&self, session_id: Uuid) -> bool {
        self.handles.contains_key(&session_id)
    }

    /// Mark a participant ready for link establishment.
    /// Returns true when both participants are now ready.
    pub fn mark_ready(&self, session_id: Uuid, participant: Participant) -> bool {
        match self.handles.get(&session_id) {
            Some(handle) => {
                let mut flags = handle.ready.lock();
                match participant {
                    Participant::Client => flags.client = true,
                    Participant::Reader => flags.reader = true,
                }
                flags.client && flags.reader
            }
            None => false,
        }
    }

    /// Whether both participants have signaled readiness.
    pub fn both_ready(&self, session_id: Uuid) -> bool {
        self.handles
            .get(&session_id)
            .map(|handle| {
                let flags = handle.ready.lock();
                flags.client && flags.reader
            })
            .unwrap_or(false)
    }

    /// Subscribe to the session's cancel channel (consumed by the billing
    /// loop). The channel fires once at teardown.
    pub fn cancel_receiver(&self, session_id: Uuid) -> Option<watch::Receiver<bool>> {
        self.handles
            .get(&session_id)
            .map(|handle| handle.cancel_tx.subscribe())
    }

    /// End an active session exactly once.
    ///
    /// The compare-and-swap transition means racing callers (balance
    /// depletion tick vs. an explicit end request) observe one winner:
    /// the winner gets `Ok(Some(session))` with the finalized row, losers
    /// get `Ok(None)` and should re-read the already-terminal session.
    pub async fn finalize(
        &self,
        session_id: Uuid,
        reason: EndReason,
    ) -> Result<Option<Session>, AppError> {
        let Some(session) = self.session_repo.mark_ended(session_id, reason).await? else {
            return Ok(None);
        };

        metrics::ACTIVE_SESSIONS.dec();
        metrics::SESSIONS_CLOSED_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();

        self.teardown(session_id).await;

        tracing::info!(
            session_id = %session_id,
            reason = reason.as_str(),
            charged_cents = session.charged_cents,
            billed_seconds = session.billed_seconds,
            "Session ended"
        );

        self.gateway.dispatch_to_users(
            GatewayEvent::session_event("SESSION_ENDED", SessionResponse::from(session.clone())),
            vec![session.client_id, session.reader_id],
        );

        Ok(Some(session))
    }

    /// Tear down a session's runtime state: stop the billing loop, drop the
    /// monitor entry, garbage-collect relayed signals, and remove the
    /// handle. Safe to call for sessions that never had a handle.
    pub async fn teardown(&self, session_id: Uuid) {
        if let Some((_, handle)) = self.handles.remove(&session_id) {
            let _ = handle.cancel_tx.send(true);
        }
        self.monitor.deregister(session_id);

        match self.signal_repo.delete_for_session(session_id).await {
            Ok(deleted) if deleted > 0 => {
                tracing::debug!(session_id = %session_id, deleted, "Signals garbage-collected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Signal GC failed");
            }
        }
    }
}
