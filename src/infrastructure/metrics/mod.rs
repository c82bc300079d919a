//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active session gauge and closed-session counter by reason
//! - Billing tick counts by outcome and tick latency histograms
//! - Relayed signal counts by delivery path
//! - Active WebSocket connection gauge

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Sessions currently in the `active` state
pub static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("active_sessions", "Sessions currently being billed")
            .namespace("reading_server"),
    )
    .expect("Failed to create ACTIVE_SESSIONS metric")
});

/// Sessions that reached `ended`, by reason
pub static SESSIONS_CLOSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sessions_closed_total", "Ended sessions by close reason")
            .namespace("reading_server"),
        &["reason"],
    )
    .expect("Failed to create SESSIONS_CLOSED_TOTAL metric")
});

/// Billing ticks by outcome ("applied", "insufficient", "failed")
pub static BILLING_TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("billing_ticks_total", "Billing ticks by outcome")
            .namespace("reading_server"),
        &["outcome"],
    )
    .expect("Failed to create BILLING_TICKS_TOTAL metric")
});

/// Latency of the atomic tick transaction in seconds
pub static BILLING_TICK_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    Histogram::with_opts(
        HistogramOpts::new(
            "billing_tick_duration_seconds",
            "Latency of the atomic billing tick transaction",
        )
        .namespace("reading_server")
        .buckets(buckets),
    )
    .expect("Failed to create BILLING_TICK_DURATION_SECONDS metric")
});

/// Relayed signals by delivery path ("push", "poll")
pub static SIGNALS_RELAYED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("signals_relayed_total", "Delivered signals by path")
            .namespace("reading_server"),
        &["path"],
    )
    .expect("Failed to create SIGNALS_RELAYED_TOTAL metric")
});

/// Active WebSocket connections gauge
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace("reading_server"),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(ACTIVE_SESSIONS.clone()))
        .expect("Failed to register ACTIVE_SESSIONS");
    registry
        .register(Box::new(SESSIONS_CLOSED_TOTAL.clone()))
        .expect("Failed to register SESSIONS_CLOSED_TOTAL");
    registry
        .register(Box::new(BILLING_TICKS_TOTAL.clone()))
        .expect("Failed to register BILLING_TICKS_TOTAL");
    registry
        .register(Box::new(BILLING_TICK_DURATION_SECONDS.clone()))
        .expect("Failed to register BILLING_TICK_DURATION_SECONDS");
    registry
        .register(Box::new(SIGNALS_RELAYED_TOTAL.clone()))
        .expect("Failed to register SIGNALS_RELAYED_TOTAL");
    registry
        .register(Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WEBSOCKET_CONNECTIONS_ACTIVE");
}

/// Gather all metrics in Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
