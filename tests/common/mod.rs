//! Common Test Utilities
//!
//! In-memory fake repositories over the domain traits, plus a harness that
//! wires the full engine (orchestrator, registry, monitor, billing loop,
//! gateway) without PostgreSQL or Redis. Combined with `start_paused`
//! tokio time, the whole billing lifecycle runs deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use reading_server::application::services::{
    BillingEngine, SessionServiceImpl, SignalServiceImpl,
};
use reading_server::config::{BillingSettings, LinkSettings, TimeoutSettings};
use reading_server::domain::{
    BillingEvent, BillingRepository, CancelReason, ChargeCommand, ChargeOutcome, EndReason,
    ReaderProfile, ReaderRepository, Session, SessionRepository, SessionState, SignalMessage,
    SignalRepository, Wallet, WalletRepository, DebitOutcome,
};
use reading_server::presentation::websocket::gateway::Gateway;
use reading_server::runtime::{ConnectionMonitor, SessionRegistry};
use reading_server::shared::error::AppError;

pub const CLIENT_ID: i64 = 101;
pub const READER_ID: i64 = 202;

/// Shared backing state for every fake repository.
#[derive(Default)]
pub struct StoreState {
    pub sessions: HashMap<Uuid, Session>,
    pub events: HashMap<Uuid, Vec<BillingEvent>>,
    pub wallets: HashMap<i64, Wallet>,
    pub readers: HashMap<i64, ReaderProfile>,
    pub signals: Vec<SignalMessage>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn with<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        f(&mut self.inner.lock())
    }

    pub fn session(&self, id: Uuid) -> Session {
        self.with(|s| s.sessions.get(&id).cloned().expect("session exists"))
    }

    pub fn events_for(&self, id: Uuid) -> Vec<BillingEvent> {
        self.with(|s| s.events.get(&id).cloned().unwrap_or_default())
    }

    pub fn wallet_balance(&self, user_id: i64) -> i64 {
        self.with(|s| s.wallets.get(&user_id).map(|w| w.balance_cents).unwrap_or(0))
    }

    pub fn reader_earnings(&self, user_id: i64) -> i64 {
        self.with(|s| s.wallets.get(&user_id).map(|w| w.earned_cents).unwrap_or(0))
    }

    pub fn set_balance(&self, user_id: i64, balance_cents: i64) {
        self.with(|s| {
            s.wallets.insert(
                user_id,
                Wallet {
                    user_id,
                    balance_cents,
                    earned_cents: 0,
                    updated_at: Utc::now(),
                },
            );
        });
    }

    pub fn set_reader(&self, user_id: i64, accepting: bool, rate_cents_per_minute: i64) {
        self.with(|s| {
            s.readers.insert(
                user_id,
                ReaderProfile {
                    user_id,
                    accepting_sessions: accepting,
                    rate_cents_per_minute,
                    updated_at: Utc::now(),
                },
            );
        });
    }

    pub fn signal_count(&self, session_id: Uuid) -> usize {
        self.with(|s| {
            s.signals
                .iter()
                .filter(|m| m.session_id == session_id)
                .count()
        })
    }
}

fn wallet_entry(state: &mut StoreState, user_id: i64) -> &mut Wallet {
    state.wallets.entry(user_id).or_insert_with(|| Wallet {
        user_id,
        balance_cents: 0,
        earned_cents: 0,
        updated_at: Utc::now(),
    })
}

#[derive(Clone)]
pub struct FakeSessionRepository(pub InMemoryStore);

#[async_trait]
impl SessionRepository for FakeSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session, AppError> {
        self.0.with(|s| {
            s.sessions.insert(session.id, session.clone());
        });
        Ok(session.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.0.with(|s| s.sessions.get(&id).cloned()))
    }

    async fn mark_accepted(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.0.with(|s| {
            let session = s.sessions.get_mut(&id)?;
            if session.state != SessionState::Pending {
                return None;
            }
            session.state = SessionState::Accepted;
            session.accepted_at = Some(Utc::now());
            Some(session.clone())
        }))
    }

    async fn mark_rejected(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.0.with(|s| {
            let session = s.sessions.get_mut(&id)?;
            if session.state != SessionState::Pending {
                return None;
            }
            session.state = SessionState::Rejected;
            session.ended_at = Some(Utc::now());
            Some(session.clone())
        }))
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        reason: CancelReason,
    ) -> Result<Option<Session>, AppError> {
        Ok(self.0.with(|s| {
            let session = s.sessions.get_mut(&id)?;
            if !matches!(
                session.state,
                SessionState::Pending | SessionState::Accepted
            ) {
                return None;
            }
            session.state = SessionState::Cancelled;
            session.close_reason = Some(reason.into());
            session.ended_at = Some(Utc::now());
            Some(session.clone())
        }))
    }

    async fn mark_active(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.0.with(|s| {
            let session = s.sessions.get_mut(&id)?;
            if session.state != SessionState::Accepted {
                return None;
            }
            session.state = SessionState::Active;
            session.started_at = Some(Utc::now());
            Some(session.clone())
        }))
    }

    async fn mark_ended(
        &self,
        id: Uuid,
        reason: EndReason,
    ) -> Result<Option<Session>, AppError> {
        Ok(self.0.with(|s| {
            let session = s.sessions.get_mut(&id)?;
            if session.state != SessionState::Active {
                return None;
            }
            session.state = SessionState::Ended;
            session.close_reason = Some(reason.into());
            session.ended_at = Some(Utc::now());
            Some(session.clone())
        }))
    }

    async fn find_in_state(&self, state: SessionState) -> Result<Vec<Session>, AppError> {
        Ok(self.0.with(|s| {
            s.sessions
                .values()
                .filter(|session| session.state == state)
                .cloned()
                .collect()
        }))
    }
}

/// Fake billing store with the same atomicity semantics as the PostgreSQL
/// implementation: the whole tick applies under one lock, and nothing is
/// mutated when the balance cannot cover the charge.
#[derive(Clone)]
pub struct FakeBillingRepository {
    store: InMemoryStore,
    fail_times: Arc<AtomicU32>,
}

impl FakeBillingRepository {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            fail_times: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make the next `n` apply_charge calls fail with a store error.
    pub fn fail_next(&self, n: u32) {
        self.fail_times.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BillingRepository for FakeBillingRepository {
    async fn apply_charge(&self, command: &ChargeCommand) -> Result<ChargeOutcome, AppError> {
        if self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Internal("balance store unreachable".into()));
        }

        self.store.with(|s| {
            let Some(session) = s.sessions.get(&command.session_id) else {
                return Ok(ChargeOutcome::SessionNotActive);
            };
            if session.state != SessionState::Active {
                return Ok(ChargeOutcome::SessionNotActive);
            }

            let balance_before = wallet_entry(s, command.client_id).balance_cents;
            if balance_before < command.amount_cents {
                return Ok(ChargeOutcome::InsufficientBalance {
                    balance_cents: balance_before,
                });
            }

            wallet_entry(s, command.client_id).balance_cents -= command.amount_cents;
            wallet_entry(s, command.reader_id).earned_cents += command.reader_credit_cents;

            let events = s.events.entry(command.session_id).or_default();
            let event = BillingEvent {
                id: Uuid::new_v4(),
                session_id: command.session_id,
                seq: events.len() as i32 + 1,
                amount_cents: command.amount_cents,
                balance_before_cents: balance_before,
                balance_after_cents: balance_before - command.amount_cents,
                reader_credit_cents: command.reader_credit_cents,
                platform_fee_cents: command.platform_fee_cents,
                created_at: Utc::now(),
            };
            events.push(event.clone());

            let session = s.sessions.get_mut(&command.session_id).unwrap();
            session.billed_seconds += command.interval_secs;
            session.charged_cents += command.amount_cents;
            session.reader_credited_cents += command.reader_credit_cents;
            session.last_tick_at = Some(Utc::now());

            Ok(ChargeOutcome::Applied(event))
        })
    }

    async fn events_for_session(&self, session_id: Uuid) -> Result<Vec<BillingEvent>, AppError> {
        Ok(self.store.events_for(session_id))
    }
}

#[derive(Clone)]
pub struct FakeWalletRepository(pub InMemoryStore);

#[async_trait]
impl WalletRepository for FakeWalletRepository {
    async fn find_or_create(&self, user_id: i64) -> Result<Wallet, AppError> {
        Ok(self.0.with(|s| wallet_entry(s, user_id).clone()))
    }

    async fn debit(&self, user_id: i64, amount_cents: i64) -> Result<DebitOutcome, AppError> {
        Ok(self.0.with(|s| {
            let wallet = wallet_entry(s, user_id);
            if wallet.balance_cents < amount_cents {
                DebitOutcome::Insufficient {
                    balance_cents: wallet.balance_cents,
                }
            } else {
                wallet.balance_cents -= amount_cents;
                DebitOutcome::Ok {
                    balance_after_cents: wallet.balance_cents,
                }
            }
        }))
    }

    async fn credit(&self, user_id: i64, amount_cents: i64) -> Result<(), AppError> {
        self.0.with(|s| {
            wallet_entry(s, user_id).balance_cents += amount_cents;
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeReaderRepository(pub InMemoryStore);

#[async_trait]
impl ReaderRepository for FakeReaderRepository {
    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<ReaderProfile>, AppError> {
        Ok(self.0.with(|s| s.readers.get(&user_id).cloned()))
    }

    async fn update(
        &self,
        user_id: i64,
        accepting_sessions: Option<bool>,
        rate_cents_per_minute: Option<i64>,
    ) -> Result<Option<ReaderProfile>, AppError> {
        Ok(self.0.with(|s| {
            let profile = s.readers.get_mut(&user_id)?;
            if let Some(accepting) = accepting_sessions {
                profile.accepting_sessions = accepting;
            }
            if let Some(rate) = rate_cents_per_minute {
                profile.rate_cents_per_minute = rate;
            }
            profile.updated_at = Utc::now();
            Some(profile.clone())
        }))
    }
}

#[derive(Clone)]
pub struct FakeSignalRepository(pub InMemoryStore);

#[async_trait]
impl SignalRepository for FakeSignalRepository {
    async fn create(&self, message: &SignalMessage) -> Result<SignalMessage, AppError> {
        self.0.with(|s| s.signals.push(message.clone()));
        Ok(message.clone())
    }

    async fn take_undelivered(
        &self,
        session_id: Uuid,
        recipient_id: i64,
    ) -> Result<Vec<SignalMessage>, AppError> {
        Ok(self.0.with(|s| {
            let mut taken: Vec<SignalMessage> = s
                .signals
                .iter_mut()
                .filter(|m| {
                    m.session_id == session_id && m.recipient_id == recipient_id && !m.delivered
                })
                .map(|m| {
                    m.delivered = true;
                    m.clone()
                })
                .collect();
            taken.sort_by_key(|m| m.id);
            taken
        }))
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.0.with(|s| {
            match s.signals.iter_mut().find(|m| m.id == id && !m.delivered) {
                Some(m) => {
                    m.delivered = true;
                    true
                }
                None => false,
            }
        }))
    }

    async fn delete_for_session(&self, session_id: Uuid) -> Result<u64, AppError> {
        Ok(self.0.with(|s| {
            let before = s.signals.len();
            s.signals.retain(|m| m.session_id != session_id);
            (before - s.signals.len()) as u64
        }))
    }
}

pub fn billing_settings() -> BillingSettings {
    BillingSettings {
        interval_secs: 60,
        reader_share_percent: 70,
        min_balance_intervals: 2,
        low_balance_intervals: 2,
        retry_max_attempts: 3,
        retry_backoff_ms: 10,
    }
}

pub fn link_settings() -> LinkSettings {
    LinkSettings {
        heartbeat_stale_secs: 10,
        disconnect_stale_secs: 30,
        grace_period_secs: 60,
        sweep_interval_ms: 1000,
    }
}

pub fn timeout_settings() -> TimeoutSettings {
    TimeoutSettings {
        pending_secs: 120,
        setup_secs: 60,
    }
}

pub type TestSessionService =
    SessionServiceImpl<FakeSessionRepository, FakeWalletRepository, FakeReaderRepository>;
pub type TestSignalService = SignalServiceImpl<FakeSessionRepository, FakeSignalRepository>;

/// The full engine wired against in-memory fakes.
pub struct TestHarness {
    pub store: InMemoryStore,
    pub service: TestSessionService,
    pub signals: TestSignalService,
    pub billing_repo: FakeBillingRepository,
    pub registry: Arc<SessionRegistry>,
    pub monitor: Arc<ConnectionMonitor>,
    pub gateway: Arc<Gateway>,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = InMemoryStore::default();
        let session_repo = FakeSessionRepository(store.clone());
        let signal_repo = FakeSignalRepository(store.clone());
        let billing_repo = FakeBillingRepository::new(store.clone());

        let gateway = Arc::new(Gateway::default());
        let monitor = Arc::new(ConnectionMonitor::new(&link_settings(), gateway.clone()));
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(session_repo.clone()),
            Arc::new(signal_repo.clone()),
            monitor.clone(),
            gateway.clone(),
        ));
        let billing = Arc::new(BillingEngine::new(
            Arc::new(billing_repo.clone()),
            registry.clone(),
            monitor.clone(),
            gateway.clone(),
            billing_settings(),
            &link_settings(),
        ));

        let service = SessionServiceImpl::new(
            Arc::new(session_repo.clone()),
            Arc::new(FakeWalletRepository(store.clone())),
            Arc::new(FakeReaderRepository(store.clone())),
            registry.clone(),
            billing,
            monitor.clone(),
            gateway.clone(),
            None,
            timeout_settings(),
        );

        let signals = SignalServiceImpl::new(
            Arc::new(session_repo),
            Arc::new(signal_repo),
            gateway.clone(),
        );

        Self {
            store,
            service,
            signals,
            billing_repo,
            registry,
            monitor,
            gateway,
        }
    }

    /// A harness with the default client wallet and an available reader.
    pub fn with_defaults(balance_cents: i64, rate_cents_per_minute: i64) -> Self {
        let harness = Self::new();
        harness.store.set_balance(CLIENT_ID, balance_cents);
        harness
            .store
            .set_reader(READER_ID, true, rate_cents_per_minute);
        harness
    }
}

/// Let spawned tasks run to quiescence without advancing time.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time and let timers fire.
pub async fn advance_and_settle(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
