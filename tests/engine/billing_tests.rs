//! Billing Engine Tests
//!
//! Deterministic tick-loop scenarios under paused time: depletion,
//! disconnect pause/resume, grace expiry, and retry behavior.

use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::common::{advance_and_settle, TestHarness, CLIENT_ID, READER_ID};
use crate::engine::{activate_session, assert_billing_invariants, run_healthy_for};
use reading_server::application::services::SessionService;
use reading_server::domain::{CloseReason, EndReason, SessionState};

/// Rate $3.00/min, balance $10.00: three ticks apply, the fourth cannot,
/// and the session ends with `balance_depleted` and exactly 3 events.
#[tokio::test(start_paused = true)]
async fn depletion_after_three_ticks() {
    let harness = TestHarness::with_defaults(1000, 300);
    let session = activate_session(&harness, 300).await;

    run_healthy_for(&harness, session.id, 245).await;

    let ended = harness.store.session(session.id);
    assert_eq!(ended.state, SessionState::Ended);
    assert_eq!(
        ended.close_reason,
        Some(CloseReason::Ended(EndReason::BalanceDepleted))
    );

    let events = harness.store.events_for(session.id);
    assert_eq!(events.len(), 3, "exactly three intervals were affordable");
    assert_eq!(ended.charged_cents, 900);
    assert_eq!(ended.billed_seconds, 180);
    // $1.00 remains; the incomplete fourth interval is not prorated
    assert_eq!(harness.store.wallet_balance(CLIENT_ID), 100);
    // 70% of each 300-cent charge
    assert_eq!(harness.store.reader_earnings(READER_ID), 630);
    assert_eq!(ended.reader_credited_cents, 630);

    assert_billing_invariants(&harness, session.id);
}

/// Disconnection freezes the countdown: nothing is charged for the gap,
/// and recovery within the grace period resumes where the interval left
/// off rather than charging retroactively.
#[tokio::test(start_paused = true)]
async fn disconnect_pauses_billing_without_retroactive_charge() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    // First tick lands at t=60
    advance_and_settle(Duration::from_secs(60)).await;
    assert_eq!(harness.store.events_for(session.id).len(), 1);

    // Silence both participants past the disconnect threshold; the sweep
    // declares the link down at t=91 with 29s left on the next interval
    advance_and_settle(Duration::from_secs(31)).await;
    harness.monitor.sweep();
    crate::common::settle().await;

    // 20 more silent seconds, still within the grace period
    advance_and_settle(Duration::from_secs(20)).await;
    assert_eq!(
        harness.store.events_for(session.id).len(),
        1,
        "no charge accrues while disconnected"
    );

    // Both sides come back; the frozen 29s resume
    harness.service.heartbeat(session.id, CLIENT_ID).await.unwrap();
    harness.service.heartbeat(session.id, READER_ID).await.unwrap();
    crate::common::settle().await;

    advance_and_settle(Duration::from_secs(28)).await;
    assert_eq!(
        harness.store.events_for(session.id).len(),
        1,
        "the interval is not complete until the frozen remainder elapses"
    );

    advance_and_settle(Duration::from_secs(2)).await;
    assert_eq!(harness.store.events_for(session.id).len(), 2);

    let session_row = harness.store.session(session.id);
    assert_eq!(session_row.state, SessionState::Active);
    assert_billing_invariants(&harness, session.id);
}

/// A disconnect that outlasts the grace period ends the session with
/// `link_failed` and no further charges.
#[tokio::test(start_paused = true)]
async fn disconnect_beyond_grace_ends_session() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    advance_and_settle(Duration::from_secs(60)).await;
    assert_eq!(harness.store.events_for(session.id).len(), 1);

    advance_and_settle(Duration::from_secs(31)).await;
    harness.monitor.sweep();
    crate::common::settle().await;

    // Grace is 60s; nobody returns
    advance_and_settle(Duration::from_secs(61)).await;

    let ended = harness.store.session(session.id);
    assert_eq!(ended.state, SessionState::Ended);
    assert_eq!(
        ended.close_reason,
        Some(CloseReason::Ended(EndReason::LinkFailed))
    );
    assert_eq!(
        harness.store.events_for(session.id).len(),
        1,
        "the unbillable gap is never charged"
    );
    assert_billing_invariants(&harness, session.id);
}

/// Transient store failures retry without advancing the sequence number;
/// the eventual success produces the next contiguous seq.
#[tokio::test(start_paused = true)]
async fn tick_retries_do_not_advance_sequence() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    // Two failures, then success within the retry budget of three
    harness.billing_repo.fail_next(2);
    advance_and_settle(Duration::from_secs(60)).await;
    // Let the backoff sleeps (10ms, 20ms) elapse
    advance_and_settle(Duration::from_secs(1)).await;
    advance_and_settle(Duration::from_secs(1)).await;

    let events = harness.store.events_for(session.id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 1);
    assert_eq!(
        harness.store.session(session.id).state,
        SessionState::Active
    );
}

/// Exhausted retries end the session rather than silently dropping the
/// charge or double-charging on recovery.
#[tokio::test(start_paused = true)]
async fn exhausted_retries_end_the_session() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    advance_and_settle(Duration::from_secs(60)).await;
    advance_and_settle(Duration::from_secs(1)).await;
    assert_eq!(harness.store.events_for(session.id).len(), 1);

    // Every attempt of the next tick fails
    harness.billing_repo.fail_next(10);
    advance_and_settle(Duration::from_secs(60)).await;
    advance_and_settle(Duration::from_secs(1)).await;
    advance_and_settle(Duration::from_secs(1)).await;

    let ended = harness.store.session(session.id);
    assert_eq!(ended.state, SessionState::Ended);
    assert_eq!(ended.close_reason, Some(CloseReason::Ended(EndReason::Error)));
    assert_eq!(
        harness.store.events_for(session.id).len(),
        1,
        "the failed interval is never charged"
    );
    assert_billing_invariants(&harness, session.id);
}

/// Per-tick arithmetic: ceil on the charge, floor on the reader share.
#[tokio::test(start_paused = true)]
async fn odd_rates_round_against_the_client_and_reader() {
    // $1.99/min: charge 199, reader credit floor(199 * 0.7) = 139
    let harness = TestHarness::with_defaults(10_000, 199);
    let session = activate_session(&harness, 199).await;

    advance_and_settle(Duration::from_secs(60)).await;

    let events = harness.store.events_for(session.id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].amount_cents, 199);
    assert_eq!(events[0].reader_credit_cents, 139);
    assert_eq!(events[0].platform_fee_cents, 60);
    assert_billing_invariants(&harness, session.id);
}
