//! WebSocket Presentation
//!
//! The push-based gateway: connection handling, event fan-out, and the
//! wire message format.

pub mod connection;
pub mod gateway;
pub mod handler;
pub mod messages;

pub use handler::ws_handler;
