//! Session Orchestrator Tests
//!
//! State machine edges, request-time validation, auto-timeouts, and the
//! concurrent-end races.

use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::common::{advance_and_settle, TestHarness, CLIENT_ID, READER_ID};
use crate::engine::{activate_session, assert_billing_invariants, run_healthy_for};
use reading_server::application::dto::request::{RequestSessionRequest, RespondAction};
use reading_server::application::services::{SessionError, SessionService};
use reading_server::domain::{CancelReason, CloseReason, Modality, SessionState};

fn request(rate: i64) -> RequestSessionRequest {
    RequestSessionRequest {
        reader_id: READER_ID,
        modality: Modality::Video,
        rate_cents_per_minute: rate,
    }
}

/// Balance $4.00 at $3.00/min cannot cover the two-interval minimum;
/// no session is created.
#[tokio::test(start_paused = true)]
async fn request_fails_on_insufficient_balance() {
    let harness = TestHarness::with_defaults(400, 300);

    let err = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::InsufficientBalance {
            required_cents: 600,
            balance_cents: 400,
        }
    ));
    assert_eq!(harness.store.with(|s| s.sessions.len()), 0);
}

#[tokio::test(start_paused = true)]
async fn request_fails_when_reader_is_unavailable() {
    let harness = TestHarness::with_defaults(10_000, 300);
    harness.store.set_reader(READER_ID, false, 300);

    let err = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ReaderUnavailable));

    // Unknown readers look the same to the client
    let err = harness
        .service
        .request_session(
            CLIENT_ID,
            RequestSessionRequest {
                reader_id: 999,
                modality: Modality::Chat,
                rate_cents_per_minute: 300,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ReaderUnavailable));
}

/// The client confirms a rate; if the reader has since changed it, the
/// request is rejected instead of silently binding either number.
#[tokio::test(start_paused = true)]
async fn request_fails_on_stale_rate() {
    let harness = TestHarness::with_defaults(10_000, 300);

    let err = harness
        .service
        .request_session(CLIENT_ID, request(250))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::RateChanged {
            current_rate_cents: 300
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn reject_is_terminal_and_responding_twice_fails() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();

    let rejected = harness
        .service
        .respond(session.id, READER_ID, RespondAction::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.state, SessionState::Rejected);

    let err = harness
        .service
        .respond(session.id, READER_ID, RespondAction::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotPending));
}

#[tokio::test(start_paused = true)]
async fn only_the_sessions_reader_may_respond() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();

    let err = harness
        .service
        .respond(session.id, CLIENT_ID, RespondAction::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotParticipant));
}

/// An unanswered request auto-cancels with `reader_unresponsive` and no
/// billing events exist.
#[tokio::test(start_paused = true)]
async fn pending_timeout_cancels_unanswered_requests() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();

    advance_and_settle(Duration::from_secs(121)).await;

    let cancelled = harness.store.session(session.id);
    assert_eq!(cancelled.state, SessionState::Cancelled);
    assert_eq!(
        cancelled.close_reason,
        Some(CloseReason::Cancelled(CancelReason::ReaderUnresponsive))
    );
    assert!(harness.store.events_for(session.id).is_empty());
}

/// An accepted session that never reaches `active` auto-cancels on the
/// shorter setup timeout.
#[tokio::test(start_paused = true)]
async fn setup_timeout_cancels_stalled_links() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();
    harness
        .service
        .respond(session.id, READER_ID, RespondAction::Accept)
        .await
        .unwrap();

    advance_and_settle(Duration::from_secs(61)).await;

    let cancelled = harness.store.session(session.id);
    assert_eq!(cancelled.state, SessionState::Cancelled);
    assert_eq!(
        cancelled.close_reason,
        Some(CloseReason::Cancelled(CancelReason::SetupTimeout))
    );
}

/// Readiness on a pending session is an invalid edge and leaves no trace.
#[tokio::test(start_paused = true)]
async fn begin_link_is_invalid_while_pending() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();

    let err = harness
        .service
        .begin_link(session.id, CLIENT_ID)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState { state: "pending" }
    ));
    assert_eq!(
        harness.store.session(session.id).state,
        SessionState::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn begin_link_is_idempotent_after_activation() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    let again = harness
        .service
        .begin_link(session.id, READER_ID)
        .await
        .unwrap();
    assert_eq!(again.state, SessionState::Active);
    assert_eq!(again.id, session.id);
}

#[tokio::test(start_paused = true)]
async fn either_party_can_cancel_before_active() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();

    let cancelled = harness.service.end(session.id, CLIENT_ID).await.unwrap();
    assert_eq!(cancelled.state, SessionState::Cancelled);
    assert_eq!(
        cancelled.close_reason,
        Some(CloseReason::Cancelled(CancelReason::ClientCancelled))
    );
}

/// Two simultaneous end requests: exactly one terminal state, and both
/// callers observe identical final totals.
#[tokio::test(start_paused = true)]
async fn concurrent_end_requests_converge() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    run_healthy_for(&harness, session.id, 61).await;
    assert_eq!(harness.store.events_for(session.id).len(), 1);

    let (from_client, from_reader) = tokio::join!(
        harness.service.end(session.id, CLIENT_ID),
        harness.service.end(session.id, READER_ID),
    );
    let from_client = from_client.unwrap();
    let from_reader = from_reader.unwrap();

    assert_eq!(from_client.state, SessionState::Ended);
    assert_eq!(from_reader.state, SessionState::Ended);
    assert_eq!(from_client.close_reason, from_reader.close_reason);
    assert_eq!(from_client.charged_cents, from_reader.charged_cents);
    assert_eq!(from_client.billed_seconds, from_reader.billed_seconds);

    assert!(!harness.registry.contains(session.id));
    assert_billing_invariants(&harness, session.id);
}

/// An explicit end racing balance depletion reports the depletion outcome
/// rather than inventing a second terminal state.
#[tokio::test(start_paused = true)]
async fn end_after_depletion_returns_the_same_result() {
    let harness = TestHarness::with_defaults(600, 300);
    let session = activate_session(&harness, 300).await;

    // Two affordable ticks, then depletion at t=180
    run_healthy_for(&harness, session.id, 185).await;

    let ended = harness.store.session(session.id);
    assert_eq!(ended.state, SessionState::Ended);
    assert_eq!(
        ended.close_reason,
        Some(CloseReason::Ended(reading_server::domain::EndReason::BalanceDepleted))
    );

    let via_end = harness.service.end(session.id, CLIENT_ID).await.unwrap();
    assert_eq!(via_end.state, SessionState::Ended);
    assert_eq!(via_end.close_reason, ended.close_reason);
    assert_eq!(via_end.charged_cents, ended.charged_cents);
    assert_eq!(via_end.charged_cents, 600);
}

#[tokio::test(start_paused = true)]
async fn only_participants_see_the_session() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(CLIENT_ID, request(300))
        .await
        .unwrap();

    let err = harness.service.get(session.id, 999).await.unwrap_err();
    assert!(matches!(err, SessionError::NotParticipant));

    let visible = harness.service.get(session.id, READER_ID).await.unwrap();
    assert_eq!(visible.id, session.id);
}
