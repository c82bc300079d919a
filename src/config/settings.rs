//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// Redis configuration
    pub redis: RedisSettings,

    /// JWT validation settings (tokens are issued by the identity provider)
    pub jwt: JwtSettings,

    /// Billing engine configuration
    pub billing: BillingSettings,

    /// Link health monitoring configuration
    pub link: LinkSettings,

    /// Session lifecycle timeouts
    pub timeouts: TimeoutSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,

    /// TTL for cached reader availability, in seconds
    pub availability_ttl_secs: u64,
}

/// JWT validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Shared secret for verifying tokens from the identity provider
    pub secret: String,
}

/// Billing engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingSettings {
    /// Billing interval in seconds of healthy connection time
    pub interval_secs: u64,

    /// Percentage of each charge credited to the reader (0-100)
    pub reader_share_percent: i64,

    /// Minimum balance required at request time, expressed in billing intervals
    pub min_balance_intervals: i64,

    /// Low-balance warning threshold, expressed in remaining billing intervals
    pub low_balance_intervals: i64,

    /// Maximum attempts for a single tick before the session is ended
    pub retry_max_attempts: u32,

    /// Base backoff between tick retries, in milliseconds (doubles per attempt)
    pub retry_backoff_ms: u64,
}

/// Link health monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSettings {
    /// A participant is stale after this many seconds without a heartbeat
    pub heartbeat_stale_secs: u64,

    /// A participant is considered gone after this many seconds
    pub disconnect_stale_secs: u64,

    /// How long a disconnected session may linger before it is ended
    pub grace_period_secs: u64,

    /// Health sweep cadence in milliseconds
    pub sweep_interval_ms: u64,
}

/// Session lifecycle timeout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSettings {
    /// Reader must respond to a pending session within this many seconds
    pub pending_secs: u64,

    /// An accepted session must reach active within this many seconds
    pub setup_secs: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes
    pub max_message_size: usize,

    /// Heartbeat interval advertised to clients, in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Connection timeout for identify in seconds
    pub identify_timeout_secs: u64,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("redis.availability_ttl_secs", 30)?
            .set_default("billing.interval_secs", 60)?
            .set_default("billing.reader_share_percent", 70)?
            .set_default("billing.min_balance_intervals", 2)?
            .set_default("billing.low_balance_intervals", 2)?
            .set_default("billing.retry_max_attempts", 3)?
            .set_default("billing.retry_backoff_ms", 500)?
            .set_default("link.heartbeat_stale_secs", 10)?
            .set_default("link.disconnect_stale_secs", 30)?
            .set_default("link.grace_period_secs", 60)?
            .set_default("link.sweep_interval_ms", 1000)?
            .set_default("timeouts.pending_secs", 120)?
            .set_default("timeouts.setup_secs", 60)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.heartbeat_interval_ms", 5000_i64)?
            .set_default("websocket.identify_timeout_secs", 30_i64)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                // Validate JWT secret length for security
                if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
                    return Err(ConfigError::Message(format!(
                        "JWT secret must be at least {} characters for security. Current length: {}",
                        MIN_JWT_SECRET_LENGTH,
                        settings.jwt.secret.len()
                    )));
                }
                if settings.billing.reader_share_percent < 0
                    || settings.billing.reader_share_percent > 100
                {
                    return Err(ConfigError::Message(
                        "billing.reader_share_percent must be between 0 and 100".into(),
                    ));
                }
                Ok(settings)
            })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid server address configuration")
    }
}
