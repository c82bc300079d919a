//! Signal Relay Tests
//!
//! Ordering, delivered-once semantics, participant validation, the push
//! fast path, and terminal-state garbage collection.

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use crate::common::{TestHarness, CLIENT_ID, READER_ID};
use crate::engine::activate_session;
use reading_server::application::dto::request::{
    RequestSessionRequest, RespondAction, SendSignalRequest,
};
use reading_server::application::services::{
    SessionService, SignalError, SignalService,
};
use reading_server::domain::{Modality, Session, SignalKind};

async fn accepted_session(harness: &TestHarness) -> Session {
    let session = harness
        .service
        .request_session(
            CLIENT_ID,
            RequestSessionRequest {
                reader_id: READER_ID,
                modality: Modality::Audio,
                rate_cents_per_minute: 300,
            },
        )
        .await
        .unwrap();
    harness
        .service
        .respond(session.id, READER_ID, RespondAction::Accept)
        .await
        .unwrap()
}

fn signal(to_user: i64, kind: SignalKind, tag: u32) -> SendSignalRequest {
    SendSignalRequest {
        to_user,
        kind,
        payload: serde_json::json!({ "tag": tag }),
    }
}

/// Messages arrive in creation order and are never redelivered.
#[tokio::test(start_paused = true)]
async fn poll_delivers_in_order_exactly_once() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = accepted_session(&harness).await;

    for (i, kind) in [SignalKind::Offer, SignalKind::Candidate, SignalKind::Candidate]
        .into_iter()
        .enumerate()
    {
        harness
            .signals
            .send(session.id, CLIENT_ID, signal(READER_ID, kind, i as u32))
            .await
            .unwrap();
    }

    let first_poll = harness.signals.poll(session.id, READER_ID).await.unwrap();
    assert_eq!(first_poll.len(), 3);
    let tags: Vec<u64> = first_poll
        .iter()
        .map(|m| m.payload["tag"].as_u64().unwrap())
        .collect();
    assert_eq!(tags, vec![0, 1, 2]);
    assert_eq!(first_poll[0].kind, SignalKind::Offer);

    // Delivered-once: a second poll returns nothing
    let second_poll = harness.signals.poll(session.id, READER_ID).await.unwrap();
    assert!(second_poll.is_empty());
}

/// Delivery is scoped per recipient: the reader's answer does not show up
/// in the client's inbox and vice versa.
#[tokio::test(start_paused = true)]
async fn recipients_have_independent_inboxes() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = accepted_session(&harness).await;

    harness
        .signals
        .send(session.id, CLIENT_ID, signal(READER_ID, SignalKind::Offer, 1))
        .await
        .unwrap();
    harness
        .signals
        .send(session.id, READER_ID, signal(CLIENT_ID, SignalKind::Answer, 2))
        .await
        .unwrap();

    let for_reader = harness.signals.poll(session.id, READER_ID).await.unwrap();
    assert_eq!(for_reader.len(), 1);
    assert_eq!(for_reader[0].kind, SignalKind::Offer);

    let for_client = harness.signals.poll(session.id, CLIENT_ID).await.unwrap();
    assert_eq!(for_client.len(), 1);
    assert_eq!(for_client[0].kind, SignalKind::Answer);
}

#[tokio::test(start_paused = true)]
async fn outsiders_cannot_send_or_poll() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = accepted_session(&harness).await;

    let err = harness
        .signals
        .send(session.id, 999, signal(READER_ID, SignalKind::Offer, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::NotParticipant));

    let err = harness
        .signals
        .send(session.id, CLIENT_ID, signal(999, SignalKind::Offer, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::NotParticipant));

    let err = harness.signals.poll(session.id, 999).await.unwrap_err();
    assert!(matches!(err, SignalError::NotParticipant));
}

/// Signals are only accepted while the link is being negotiated or live.
#[tokio::test(start_paused = true)]
async fn signals_rejected_outside_accepted_and_active() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = harness
        .service
        .request_session(
            CLIENT_ID,
            RequestSessionRequest {
                reader_id: READER_ID,
                modality: Modality::Chat,
                rate_cents_per_minute: 300,
            },
        )
        .await
        .unwrap();

    let err = harness
        .signals
        .send(session.id, CLIENT_ID, signal(READER_ID, SignalKind::Offer, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::InvalidState { state: "pending" }));
}

#[tokio::test(start_paused = true)]
async fn signals_flow_during_active_sessions() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = activate_session(&harness, 300).await;

    harness
        .signals
        .send(
            session.id,
            READER_ID,
            signal(CLIENT_ID, SignalKind::ConnectionState, 7),
        )
        .await
        .unwrap();

    let polled = harness.signals.poll(session.id, CLIENT_ID).await.unwrap();
    assert_eq!(polled.len(), 1);
    assert_eq!(polled[0].kind, SignalKind::ConnectionState);
}

/// With a live gateway connection the signal is pushed immediately and
/// marked delivered, so the polling fallback never sees it.
#[tokio::test(start_paused = true)]
async fn push_delivery_bypasses_polling() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = accepted_session(&harness).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .gateway
        .register_connection("reader-conn".into(), READER_ID, tx);

    harness
        .signals
        .send(session.id, CLIENT_ID, signal(READER_ID, SignalKind::Offer, 5))
        .await
        .unwrap();

    let pushed = rx.try_recv().expect("signal should be pushed");
    assert_eq!(pushed.t.as_deref(), Some("SIGNAL"));

    let polled = harness.signals.poll(session.id, READER_ID).await.unwrap();
    assert!(polled.is_empty(), "pushed signals are never redelivered");
}

/// All of a session's messages are dropped once it reaches a terminal
/// state.
#[tokio::test(start_paused = true)]
async fn signals_are_garbage_collected_at_terminal_state() {
    let harness = TestHarness::with_defaults(10_000, 300);
    let session = accepted_session(&harness).await;

    for i in 0..3 {
        harness
            .signals
            .send(
                session.id,
                CLIENT_ID,
                signal(READER_ID, SignalKind::Candidate, i),
            )
            .await
            .unwrap();
    }
    assert_eq!(harness.store.signal_count(session.id), 3);

    harness.service.end(session.id, READER_ID).await.unwrap();
    crate::common::settle().await;

    assert_eq!(harness.store.signal_count(session.id), 0);
}
