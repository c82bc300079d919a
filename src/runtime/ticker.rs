//! Billing Tick Loop
//!
//! One instance of [`run`] executes per active session, spawned when the
//! session activates and stopped through the registry's cancel channel.
//!
//! The countdown measures healthy connection time, not wall-clock time:
//! while the monitor reports `Disconnected` the remaining time is frozen,
//! and if the disconnect outlasts the grace period the session ends with
//! `link_failed` and nothing is charged for the gap. Sequence numbers are
//! assigned inside the tick transaction, so retries after transient store
//! failures can never skip or duplicate a sequence number.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::BillingSettings;
use crate::domain::{
    interval_charge_cents, split_charge, BillingEvent, BillingRepository, ChargeCommand,
    ChargeOutcome, EndReason, Session,
};
use crate::infrastructure::metrics;
use crate::presentation::websocket::gateway::{
    BillingTickEvent, Gateway, GatewayEvent, LowBalanceEvent,
};
use crate::runtime::monitor::LinkHealth;
use crate::runtime::registry::SessionRegistry;

/// Everything one billing loop needs; the session snapshot carries the
/// frozen rate and the participant ids.
pub struct TickerContext {
    pub session: Session,
    pub billing_repo: Arc<dyn BillingRepository>,
    pub registry: Arc<SessionRegistry>,
    pub gateway: Arc<Gateway>,
    pub billing: BillingSettings,
    pub grace_period: Duration,
    pub cancel_rx: watch::Receiver<bool>,
    pub health_rx: watch::Receiver<LinkHealth>,
}

enum Wait {
    Elapsed,
    Cancelled,
    GraceExpired,
}

enum TickResult {
    Applied(BillingEvent),
    Insufficient,
    Stopped,
    Failed,
}

/// Run the per-session billing loop until the session ends or is cancelled.
pub async fn run(mut ctx: TickerContext) {
    let interval = Duration::from_secs(ctx.billing.interval_secs);
    let charge = interval_charge_cents(
        ctx.session.rate_cents_per_minute,
        ctx.billing.interval_secs,
    );
    let (reader_credit, platform_fee) = split_charge(charge, ctx.billing.reader_share_percent);
    let command = ChargeCommand {
        session_id: ctx.session.id,
        client_id: ctx.session.client_id,
        reader_id: ctx.session.reader_id,
        amount_cents: charge,
        reader_credit_cents: reader_credit,
        platform_fee_cents: platform_fee,
        interval_secs: ctx.billing.interval_secs as i64,
    };

    tracing::debug!(
        session_id = %ctx.session.id,
        charge_cents = charge,
        interval_secs = ctx.billing.interval_secs,
        "Billing loop started"
    );

    loop {
        match wait_for_interval(&mut ctx, interval).await {
            Wait::Cancelled => return,
            Wait::GraceExpired => {
                tracing::info!(
                    session_id = %ctx.session.id,
                    "Disconnect outlasted grace period"
                );
                let _ = ctx
                    .registry
                    .finalize(ctx.session.id, EndReason::LinkFailed)
                    .await;
                return;
            }
            Wait::Elapsed => {}
        }

        match apply_with_retry(&ctx, &command).await {
            TickResult::Applied(event) => {
                metrics::BILLING_TICKS_TOTAL
                    .with_label_values(&["applied"])
                    .inc();
                notify_tick(&ctx, &event, charge);
            }
            TickResult::Insufficient => {
                metrics::BILLING_TICKS_TOTAL
                    .with_label_values(&["insufficient"])
                    .inc();
                let _ = ctx
                    .registry
                    .finalize(ctx.session.id, EndReason::BalanceDepleted)
                    .await;
                return;
            }
            TickResult::Stopped => return,
            TickResult::Failed => {
                metrics::BILLING_TICKS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                let _ = ctx
                    .registry
                    .finalize(ctx.session.id, EndReason::Error)
                    .await;
                return;
            }
        }
    }
}

/// Wait until one full interval of billable (non-disconnected) time has
/// elapsed. Degraded links keep billing; only `Disconnected` freezes the
/// countdown.
async fn wait_for_interval(ctx: &mut TickerContext, interval: Duration) -> Wait {
    let mut remaining = interval;
    loop {
        if *ctx.health_rx.borrow() == LinkHealth::Disconnected {
            // Countdown frozen; wait for recovery within the grace period
            let grace = tokio::time::sleep(ctx.grace_period);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    _ = ctx.cancel_rx.changed() => return Wait::Cancelled,
                    _ = &mut grace => return Wait::GraceExpired,
                    changed = ctx.health_rx.changed() => {
                        if changed.is_err() {
                            return Wait::Cancelled;
                        }
                        if *ctx.health_rx.borrow() == LinkHealth::Healthy {
                            break;
                        }
                    }
                }
            }
            continue;
        }

        let sleep = tokio::time::sleep(remaining);
        tokio::pin!(sleep);
        let paused = loop {
            tokio::select! {
                _ = ctx.cancel_rx.changed() => return Wait::Cancelled,
                _ = &mut sleep => break false,
                changed = ctx.health_rx.changed() => {
                    if changed.is_err() {
                        return Wait::Cancelled;
                    }
                    if *ctx.health_rx.borrow() == LinkHealth::Disconnected {
                        // Freeze whatever is left of this interval
                        remaining = sleep
                            .deadline()
                            .saturating_duration_since(Instant::now());
                        break true;
                    }
                    // Healthy <-> degraded flaps do not pause billing
                }
            }
        };
        if !paused {
            return Wait::Elapsed;
        }
    }
}

/// Apply one tick with bounded retries. The sequence number advances only
/// when the transaction commits, so a retried tick never double-charges.
async fn apply_with_retry(ctx: &TickerContext, command: &ChargeCommand) -> TickResult {
    let mut backoff = Duration::from_millis(ctx.billing.retry_backoff_ms);
    for attempt in 1..=ctx.billing.retry_max_attempts {
        let timer = metrics::BILLING_TICK_DURATION_SECONDS.start_timer();
        let result = ctx.billing_repo.apply_charge(command).await;
        timer.observe_duration();

        match result {
            Ok(ChargeOutcome::Applied(event)) => return TickResult::Applied(event),
            Ok(ChargeOutcome::InsufficientBalance { balance_cents }) => {
                tracing::info!(
                    session_id = %ctx.session.id,
                    balance_cents,
                    required_cents = command.amount_cents,
                    "Balance depleted"
                );
                return TickResult::Insufficient;
            }
            Ok(ChargeOutcome::SessionNotActive) => return TickResult::Stopped,
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session.id,
                    attempt,
                    error = %e,
                    "Billing tick failed"
                );
                if attempt < ctx.billing.retry_max_attempts {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    TickResult::Failed
}

fn notify_tick(ctx: &TickerContext, event: &BillingEvent, charge: i64) {
    // With a fixed rate and no proration every tick charges the same
    // amount, so running totals follow directly from the sequence number.
    let tick = BillingTickEvent {
        session_id: event.session_id,
        seq: event.seq,
        amount_cents: event.amount_cents,
        balance_after_cents: event.balance_after_cents,
        charged_cents_total: event.amount_cents * event.seq as i64,
        billed_seconds_total: ctx.billing.interval_secs as i64 * event.seq as i64,
    };
    ctx.gateway.dispatch_to_users(
        GatewayEvent::BillingTick(tick),
        vec![ctx.session.client_id, ctx.session.reader_id],
    );

    let threshold = charge * ctx.billing.low_balance_intervals;
    if event.balance_after_cents < threshold {
        ctx.gateway.dispatch_to_users(
            GatewayEvent::LowBalance(LowBalanceEvent {
                session_id: event.session_id,
                balance_cents: event.balance_after_cents,
                interval_charge_cents: charge,
                remaining_intervals: event.balance_after_cents / charge.max(1),
            }),
            vec![ctx.session.client_id],
        );
    }
}
