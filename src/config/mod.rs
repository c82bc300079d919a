//! Configuration Module
//!
//! Application settings loaded from config files and environment variables.

mod settings;

pub use settings::{
    BillingSettings, CorsSettings, DatabaseSettings, JwtSettings, LinkSettings, RedisSettings,
    ServerSettings, Settings, TimeoutSettings, WebSocketSettings, MIN_JWT_SECRET_LENGTH,
};
