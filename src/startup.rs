//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::application::services::BillingEngine;
use crate::config::Settings;
use crate::infrastructure::repositories::{
    PgBillingRepository, PgSessionRepository, PgSignalRepository,
};
use crate::infrastructure::{cache, database};
use crate::presentation::http::handlers::session::session_service;
use crate::presentation::http::routes;
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::gateway::Gateway;
use crate::runtime::monitor::ConnectionMonitor;
use crate::runtime::registry::SessionRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub gateway: Arc<Gateway>,
    pub monitor: Arc<ConnectionMonitor>,
    pub registry: Arc<SessionRegistry>,
    pub billing: Arc<BillingEngine>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        // Create database pool and apply migrations
        let db = database::create_pool(&settings.database).await?;
        database::run_migrations(&db).await?;
        tracing::info!("Database connection pool created");

        // Create Redis client
        let redis = cache::create_redis_client(&settings.redis).await?;
        tracing::info!("Redis connection established");

        // Create WebSocket gateway
        let gateway = Arc::new(Gateway::new(settings.websocket.heartbeat_interval_ms));

        // Create link health monitor and start its downgrade sweep
        let monitor = Arc::new(ConnectionMonitor::new(&settings.link, gateway.clone()));
        tokio::spawn(monitor.clone().run_sweeper());

        // Create the session registry and billing engine
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(PgSessionRepository::new(db.clone())),
            Arc::new(PgSignalRepository::new(db.clone())),
            monitor.clone(),
            gateway.clone(),
        ));
        let billing = Arc::new(BillingEngine::new(
            Arc::new(PgBillingRepository::new(db.clone())),
            registry.clone(),
            monitor.clone(),
            gateway.clone(),
            settings.billing.clone(),
            &settings.link,
        ));

        // Create app state
        let state = AppState {
            db,
            redis,
            gateway,
            monitor,
            registry,
            billing,
            settings: Arc::new(settings.clone()),
        };

        // Finalize sessions a previous process left in flight
        if let Err(e) = session_service(&state).recover_on_boot().await {
            tracing::error!(error = %e, "Boot recovery failed");
        }

        // Build router with middleware
        let router = routes::create_router(state.clone())
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        // Bind to address
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self { listener, router })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
