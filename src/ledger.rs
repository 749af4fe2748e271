//! The Ledger: owns every balance mutation and the append-only transaction
//! history behind it.
//!
//! Both mutations follow the same discipline — `SELECT ... FOR UPDATE` on
//! the account row, mutate, append a transaction, commit — so debits and
//! credits for one account are strictly serialized while different accounts
//! proceed in parallel. The balance is, by construction, the sum of the
//! account's transaction amounts and can never go negative.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ledger::{TransactionRow, TxKind, TxQuery};

#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Withdraw `amount` from the account, appending a transaction with a
    /// negative signed amount. Fails with `InsufficientFunds` and applies
    /// nothing when the balance does not cover the amount.
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        kind: TxKind,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if amount < Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "debit amount must not be negative".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // Exclusive row lock: concurrent debits/credits for this account
        // queue behind us until commit.
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;

        if amount > balance {
            // Implicit rollback on drop; nothing was written.
            return Err(AppError::InsufficientFunds);
        }

        sqlx::query("UPDATE accounts SET balance = balance - $2 WHERE id = $1")
            .bind(account_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        insert_transaction(&mut tx, account_id, -amount, kind, description, None, now).await?;

        tx.commit().await?;

        tracing::info!(%account_id, %amount, kind = kind.as_str(), "ledger debit");
        Ok(())
    }

    /// Deposit `amount` into the account. Always succeeds under the same
    /// lock discipline as `debit`.
    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        kind: TxKind,
        description: &str,
        external_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if amount < Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "credit amount must not be negative".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(AppError::NotFound);
        }

        sqlx::query("UPDATE accounts SET balance = balance + $2 WHERE id = $1")
            .bind(account_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        insert_transaction(&mut tx, account_id, amount, kind, description, external_ref, now)
            .await?;

        tx.commit().await?;

        tracing::info!(%account_id, %amount, kind = kind.as_str(), "ledger credit");
        Ok(())
    }

    /// Transaction history, newest first, with an optional kind filter.
    /// Read-only; committed-read consistency is all that is required.
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        query: TxQuery,
    ) -> Result<Vec<TransactionRow>, AppError> {
        let query = query.clamped();
        let rows = match query.kind {
            Some(kind) => {
                sqlx::query_as::<_, TransactionRow>(
                    "SELECT id, account_id, amount, kind, description, external_ref, created_at \
                     FROM transactions WHERE account_id = $1 AND kind = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4",
                )
                .bind(account_id)
                .bind(kind.as_str())
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TransactionRow>(
                    "SELECT id, account_id, amount, kind, description, external_ref, created_at \
                     FROM transactions WHERE account_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(account_id)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_id: Uuid,
    amount: Decimal,
    kind: TxKind,
    description: &str,
    external_ref: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions (id, account_id, amount, kind, description, external_ref, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(amount)
    .bind(kind.as_str())
    .bind(description)
    .bind(external_ref)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
