//! Wallet Repository Implementation
//!
//! PostgreSQL implementation of atomic balance operations. Debits are a
//! single guarded update, so concurrent spenders can never overdraw a
//! balance; the schema's non-negative check backs this at the storage
//! level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{DebitOutcome, Wallet, WalletRepository};
use crate::shared::error::AppError;

/// PostgreSQL wallet repository implementation.
pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    /// Creates a new PgWalletRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for wallet queries.
#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    user_id: i64,
    balance_cents: i64,
    earned_cents: i64,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn into_wallet(self) -> Wallet {
        Wallet {
            user_id: self.user_id,
            balance_cents: self.balance_cents,
            earned_cents: self.earned_cents,
            updated_at: self.updated_at,
        }
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn find_or_create(&self, user_id: i64) -> Result<Wallet, AppError> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, balance_cents, earned_cents, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_wallet())
    }

    async fn debit(&self, user_id: i64, amount_cents: i64) -> Result<DebitOutcome, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE wallets
            SET balance_cents = balance_cents - $2, updated_at = NOW()
            WHERE user_id = $1 AND balance_cents >= $2
            RETURNING balance_cents
            "#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((balance_after_cents,)) => Ok(DebitOutcome::Ok { balance_after_cents }),
            None => {
                let wallet = self.find_or_create(user_id).await?;
                Ok(DebitOutcome::Insufficient {
                    balance_cents: wallet.balance_cents,
                })
            }
        }
    }

    async fn credit(&self, user_id: i64, amount_cents: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance_cents)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET balance_cents = wallets.balance_cents + EXCLUDED.balance_cents,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
