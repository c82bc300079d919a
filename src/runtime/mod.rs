//! Live Session Runtime
//!
//! In-memory state for sessions that are currently being set up or billed:
//! the per-session registry of runtime handles, the connection health
//! monitor, and the billing tick loop. Everything here is ephemeral and
//! reconstructed from live traffic; durable truth stays in the database
//! (the session accumulators and the per-tick watermark).

pub mod monitor;
pub mod registry;
pub mod ticker;

pub use monitor::{ConnectionMonitor, LinkHealth};
pub use registry::SessionRegistry;
