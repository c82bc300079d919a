//! Connection Monitor
//!
//! Tracks per-session link health from participant heartbeats. Health is
//! derived, never stored durably: a restarted process knows nothing until
//! heartbeats arrive again.
//!
//! Derivation: both participants fresh -> `Healthy`; any participant unseen
//! past the disconnect threshold (or never seen) -> `Disconnected`;
//! otherwise -> `Degraded`. Upgrades happen on heartbeat receipt; a sweep
//! task applies downgrades as time passes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::LinkSettings;
use crate::domain::Participant;
use crate::presentation::websocket::gateway::{ConnectionHealthEvent, Gateway, GatewayEvent};

/// Derived connectivity status of a session's link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkHealth {
    Healthy,
    Degraded,
    Disconnected,
}

impl LinkHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Per-participant freshness relative to the two staleness thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Stale,
    Gone,
}

struct LinkState {
    client_id: i64,
    reader_id: i64,
    client_seen: Option<Instant>,
    reader_seen: Option<Instant>,
    health: LinkHealth,
    health_tx: watch::Sender<LinkHealth>,
}

/// Ephemeral per-session link health tracker.
pub struct ConnectionMonitor {
    links: DashMap<Uuid, LinkState>,
    gateway: Arc<Gateway>,
    stale_after: Duration,
    gone_after: Duration,
    sweep_interval: Duration,
}

impl ConnectionMonitor {
    pub fn new(settings: &LinkSettings, gateway: Arc<Gateway>) -> Self {
        Self {
            links: DashMap::new(),
            gateway,
            stale_after: Duration::from_secs(settings.heartbeat_stale_secs),
            gone_after: Duration::from_secs(settings.disconnect_stale_secs),
            sweep_interval: Duration::from_millis(settings.sweep_interval_ms),
        }
    }

    /// Start tracking a session. Health begins `Disconnected` until both
    /// participants heartbeat.
    pub fn register(&self, session_id: Uuid, client_id: i64, reader_id: i64) {
        let (health_tx, _) = watch::channel(LinkHealth::Disconnected);
        self.links.insert(
            session_id,
            LinkState {
                client_id,
                reader_id,
                client_seen: None,
                reader_seen: None,
                health: LinkHealth::Disconnected,
                health_tx,
            },
        );
    }

    /// Stop tracking a session. Dropping the watch sender wakes any
    /// subscriber still waiting on health changes.
    pub fn deregister(&self, session_id: Uuid) {
        self.links.remove(&session_id);
    }

    /// Subscribe to a session's health changes.
    pub fn subscribe(&self, session_id: Uuid) -> Option<watch::Receiver<LinkHealth>> {
        self.links
            .get(&session_id)
            .map(|state| state.health_tx.subscribe())
    }

    /// Current health of a session's link.
    pub fn health(&self, session_id: Uuid) -> Option<LinkHealth> {
        self.links.get(&session_id).map(|state| state.health)
    }

    /// Record a heartbeat. Returns the new health when the heartbeat caused
    /// a transition.
    pub fn heartbeat(&self, session_id: Uuid, participant: Participant) -> Option<LinkHealth> {
        let now = Instant::now();
        let transition = {
            let mut state = self.links.get_mut(&session_id)?;
            match participant {
                Participant::Client => state.client_seen = Some(now),
                Participant::Reader => state.reader_seen = Some(now),
            }
            self.apply_derived(&mut state, now)
        };
        if let Some(health) = transition {
            self.notify(session_id, health);
        }
        transition
    }

    /// Recompute health for every tracked session, applying downgrades.
    /// Returns the sessions whose health changed.
    pub fn sweep(&self) -> Vec<(Uuid, LinkHealth)> {
        let now = Instant::now();
        let mut changed = Vec::new();
        for mut entry in self.links.iter_mut() {
            let session_id = *entry.key();
            if let Some(health) = self.apply_derived(entry.value_mut(), now) {
                changed.push((session_id, health));
            }
        }
        for (session_id, health) in &changed {
            self.notify(*session_id, *health);
        }
        changed
    }

    /// Run the periodic downgrade sweep until the process exits.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            for (session_id, health) in self.sweep() {
                tracing::debug!(
                    session_id = %session_id,
                    health = health.as_str(),
                    "Link health changed"
                );
            }
        }
    }

    fn apply_derived(&self, state: &mut LinkState, now: Instant) -> Option<LinkHealth> {
        let derived = self.derive(state, now);
        if derived == state.health {
            return None;
        }
        state.health = derived;
        let _ = state.health_tx.send(derived);
        Some(derived)
    }

    fn derive(&self, state: &LinkState, now: Instant) -> LinkHealth {
        match (state.client_seen, state.reader_seen) {
            (None, None) => LinkHealth::Disconnected,
            // Link still forming: degraded until the present side is
            // itself definitively gone
            (Some(seen), None) | (None, Some(seen)) => {
                if self.freshness(seen, now) == Freshness::Gone {
                    LinkHealth::Disconnected
                } else {
                    LinkHealth::Degraded
                }
            }
            (Some(client), Some(reader)) => {
                let client = self.freshness(client, now);
                let reader = self.freshness(reader, now);
                if client == Freshness::Gone || reader == Freshness::Gone {
                    LinkHealth::Disconnected
                } else if client == Freshness::Fresh && reader == Freshness::Fresh {
                    LinkHealth::Healthy
                } else {
                    LinkHealth::Degraded
                }
            }
        }
    }

    fn freshness(&self, seen: Instant, now: Instant) -> Freshness {
        let elapsed = now.saturating_duration_since(seen);
        if elapsed <= self.stale_after {
            Freshness::Fresh
        } else if elapsed <= self.gone_after {
            Freshness::Stale
        } else {
            Freshness::Gone
        }
    }

    fn notify(&self, session_id: Uuid, health: LinkHealth) {
        if let Some(state) = self.links.get(&session_id) {
            self.gateway.dispatch_to_users(
                GatewayEvent::ConnectionHealth(ConnectionHealthEvent {
                    session_id,
                    health: health.as_str().to_string(),
                }),
                vec![state.client_id, state.reader_id],
            );
        }
    }
}
