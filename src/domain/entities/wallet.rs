//! Wallet entity and repository trait.
//!
//! Maps to the `wallets` table: one row per user, holding the spending
//! balance (clients) and the accrued-earnings counter (readers). Balances
//! are mutated only through atomic debit/credit operations tied to a
//! billing event or an external top-up/payout confirmation, never directly
//! by UI-facing code, and never recomputed from ledger scans during a tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A user's balance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: i64,

    /// Spendable balance in cents; the schema enforces it never goes negative
    pub balance_cents: i64,

    /// Accrued reader earnings in cents
    pub earned_cents: i64,

    pub updated_at: DateTime<Utc>,
}

/// Result of an atomic debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Ok { balance_after_cents: i64 },
    Insufficient { balance_cents: i64 },
}

/// Repository trait for wallet operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Fetch a user's wallet, creating an empty one if absent.
    async fn find_or_create(&self, user_id: i64) -> Result<Wallet, AppError>;

    /// Atomically debit `amount_cents` from the spending balance.
    /// Fails closed: the balance is checked and decremented in one guarded
    /// update, so concurrent debits can never overdraw.
    async fn debit(&self, user_id: i64, amount_cents: i64) -> Result<DebitOutcome, AppError>;

    /// Atomically credit `amount_cents` to the spending balance
    /// (external top-up confirmations arrive through this).
    async fn credit(&self, user_id: i64, amount_cents: i64) -> Result<(), AppError>;
}
