//! Billing Engine
//!
//! Spawns and supervises one billing tick loop per active session. The loop
//! itself lives in [`crate::runtime::ticker`]; this service wires it to the
//! session's cancel channel and health watch, and owns the billing
//! configuration shared by all loops.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BillingSettings, LinkSettings};
use crate::domain::{interval_charge_cents, BillingRepository, Session};
use crate::presentation::websocket::gateway::Gateway;
use crate::runtime::monitor::ConnectionMonitor;
use crate::runtime::registry::SessionRegistry;
use crate::runtime::ticker::{self, TickerContext};

/// Per-session billing loop supervisor.
pub struct BillingEngine {
    billing_repo: Arc<dyn BillingRepository>,
    registry: Arc<SessionRegistry>,
    monitor: Arc<ConnectionMonitor>,
    gateway: Arc<Gateway>,
    settings: BillingSettings,
    grace_period: Duration,
}

impl BillingEngine {
    pub fn new(
        billing_repo: Arc<dyn BillingRepository>,
        registry: Arc<SessionRegistry>,
        monitor: Arc<ConnectionMonitor>,
        gateway: Arc<Gateway>,
        billing: BillingSettings,
        link: &LinkSettings,
    ) -> Self {
        Self {
            billing_repo,
            registry,
            monitor,
            gateway,
            settings: billing,
            grace_period: Duration::from_secs(link.grace_period_secs),
        }
    }

    /// The charge one interval costs at the given rate.
    pub fn interval_charge(&self, rate_cents_per_minute: i64) -> i64 {
        interval_charge_cents(rate_cents_per_minute, self.settings.interval_secs)
    }

    /// Minimum balance required to start a session at the given rate.
    pub fn minimum_balance(&self, rate_cents_per_minute: i64) -> i64 {
        self.interval_charge(rate_cents_per_minute) * self.settings.min_balance_intervals
    }

    /// Start the billing loop for a newly activated session. The session
    /// must already be registered (cancel channel) and monitored (health
    /// watch); without either, no loop is started and the caller's
    /// activation should not have happened.
    pub fn start(&self, session: &Session) {
        let Some(health_rx) = self.monitor.subscribe(session.id) else {
            tracing::error!(session_id = %session.id, "No monitor entry; billing not started");
            return;
        };
        let Some(cancel_rx) = self.registry.cancel_receiver(session.id) else {
            tracing::error!(session_id = %session.id, "No registry handle; billing not started");
            return;
        };

        let ctx = TickerContext {
            session: session.clone(),
            billing_repo: self.billing_repo.clone(),
            registry: self.registry.clone(),
            gateway: self.gateway.clone(),
            billing: self.settings.clone(),
            grace_period: self.grace_period,
            cancel_rx,
            health_rx,
        };

        tokio::spawn(ticker::run(ctx));
    }
}
