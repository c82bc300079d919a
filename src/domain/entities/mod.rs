//! # Domain Entities
//!
//! Core domain entities of the live session engine. All persisted entities
//! map directly to their corresponding database tables.
//!
//! ## Core Entities
//!
//! - **Session**: One billed client-reader consultation and its state machine
//! - **BillingEvent**: One immutable per-interval charge record
//! - **SignalMessage**: One opaque handshake payload relayed between participants
//! - **Wallet**: A user's spending balance and accrued earnings
//! - **ReaderProfile**: A reader's availability flag and listed per-minute rate
//!
//! ## Repository Traits
//!
//! Each entity has an associated repository trait defining data access
//! operations. These traits are implemented in the infrastructure layer,
//! following the dependency inversion principle.

mod billing_event;
mod reader;
mod session;
mod signal;
mod wallet;

// Re-export Session entity and related types
pub use session::{
    CloseReason, EndReason, CancelReason, Modality, Participant, Session, SessionRepository,
    SessionState,
};

// Re-export BillingEvent entity and related types
pub use billing_event::{
    interval_charge_cents, split_charge, BillingEvent, BillingRepository, ChargeCommand,
    ChargeOutcome,
};

// Re-export SignalMessage entity and related types
pub use signal::{SignalKind, SignalMessage, SignalRepository};

// Re-export Wallet entity and related types
pub use wallet::{DebitOutcome, Wallet, WalletRepository};

// Re-export ReaderProfile entity and related types
pub use reader::{ReaderProfile, ReaderRepository};

// Repository mocks for service unit tests
#[cfg(test)]
pub use billing_event::MockBillingRepository;
#[cfg(test)]
pub use reader::MockReaderRepository;
#[cfg(test)]
pub use session::MockSessionRepository;
#[cfg(test)]
pub use signal::MockSignalRepository;
#[cfg(test)]
pub use wallet::MockWalletRepository;
