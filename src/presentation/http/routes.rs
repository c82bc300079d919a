//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::auth_middleware;
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        // WebSocket gateway endpoint (push path for signals, heartbeats,
        // and billing notifications)
        .route("/gateway", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// API v1 routes (all protected)
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/sessions", session_routes(state.clone()))
        .nest("/wallets", wallet_routes(state.clone()))
        .nest("/readers", reader_routes(state))
}

/// Session orchestrator and signaling relay routes
fn session_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::session::create_session))
        .route("/{session_id}", get(handlers::session::get_session))
        .route(
            "/{session_id}/respond",
            post(handlers::session::respond_to_session),
        )
        .route("/{session_id}/ready", post(handlers::session::ready))
        .route(
            "/{session_id}/heartbeat",
            post(handlers::session::heartbeat),
        )
        .route("/{session_id}/end", post(handlers::session::end_session))
        .route("/{session_id}/signal", post(handlers::signal::send_signal))
        .route("/{session_id}/signals", get(handlers::signal::get_signals))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Wallet routes
fn wallet_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/@me", get(handlers::wallet::get_wallet))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Reader availability routes
fn reader_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/@me", patch(handlers::reader::update_reader))
        .route("/{reader_id}", get(handlers::reader::get_reader))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
