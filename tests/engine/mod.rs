mod billing_tests;
mod session_flow_tests;
mod signal_tests;

use std::time::Duration;

use uuid::Uuid;

use crate::common::{TestHarness, CLIENT_ID, READER_ID};
use reading_server::application::dto::request::{RequestSessionRequest, RespondAction};
use reading_server::application::services::SessionService;
use reading_server::domain::{Modality, Session, SessionState};

/// Drive a session from request to `active` without advancing time.
pub async fn activate_session(harness: &TestHarness, rate_cents_per_minute: i64) -> Session {
    let session = harness
        .service
        .request_session(
            CLIENT_ID,
            RequestSessionRequest {
                reader_id: READER_ID,
                modality: Modality::Video,
                rate_cents_per_minute,
            },
        )
        .await
        .expect("request should succeed");

    harness
        .service
        .respond(session.id, READER_ID, RespondAction::Accept)
        .await
        .expect("accept should succeed");

    harness
        .service
        .heartbeat(session.id, CLIENT_ID)
        .await
        .expect("client heartbeat");
    harness
        .service
        .heartbeat(session.id, READER_ID)
        .await
        .expect("reader heartbeat");

    harness
        .service
        .begin_link(session.id, CLIENT_ID)
        .await
        .expect("client ready");
    let active = harness
        .service
        .begin_link(session.id, READER_ID)
        .await
        .expect("reader ready");

    assert_eq!(active.state, SessionState::Active);
    active
}

/// Keep both participants' heartbeats fresh across `secs` of paused time,
/// letting the billing loop tick on the way.
pub async fn run_healthy_for(harness: &TestHarness, session_id: Uuid, secs: u64) {
    for _ in 0..secs {
        crate::common::advance_and_settle(Duration::from_secs(1)).await;
        let _ = harness.service.heartbeat(session_id, CLIENT_ID).await;
        let _ = harness.service.heartbeat(session_id, READER_ID).await;
    }
}

/// The core billing invariant: session accumulators match the event log.
pub fn assert_billing_invariants(harness: &TestHarness, session_id: Uuid) {
    let session = harness.store.session(session_id);
    let events = harness.store.events_for(session_id);

    let total: i64 = events.iter().map(|e| e.amount_cents).sum();
    assert_eq!(
        session.charged_cents, total,
        "charged total must equal the sum of billing events"
    );

    for (i, event) in events.iter().enumerate() {
        assert_eq!(
            event.seq,
            i as i32 + 1,
            "sequence numbers must be contiguous from 1"
        );
        assert_eq!(
            event.balance_after_cents,
            event.balance_before_cents - event.amount_cents
        );
        assert_eq!(
            event.reader_credit_cents + event.platform_fee_cents,
            event.amount_cents
        );
    }
}
