//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **SessionService**: the session orchestrator (state machine, timeouts)
//! - **BillingEngine**: per-session billing tick loops
//! - **SignalService**: the signaling relay between participants

pub mod billing_service;
pub mod session_service;
pub mod signal_service;

// Re-export billing engine types
pub use billing_service::BillingEngine;

// Re-export session service types
pub use session_service::{SessionService, SessionServiceImpl, SessionError};

// Re-export signal service types
pub use signal_service::{SignalService, SignalServiceImpl, SignalError};
