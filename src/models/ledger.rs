//! Ledger entry model and query parameters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a ledger entry. Stored as text in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    /// Deposit confirmed by the external payment hook.
    Credit,
    /// Token issuance charge.
    Debit,
    /// Prorated refund on revocation.
    Refund,
    /// Promotional credit (referrals, bundles — issued by out-of-scope callers).
    Bonus,
}

impl TxKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(TxKind::Credit),
            "debit" => Some(TxKind::Debit),
            "refund" => Some(TxKind::Refund),
            "bonus" => Some(TxKind::Bonus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Credit => "credit",
            TxKind::Debit => "debit",
            TxKind::Refund => "refund",
            TxKind::Bonus => "bonus",
        }
    }
}

/// Immutable ledger entry. Created exactly once per balance mutation,
/// never updated or deleted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Signed: negative for debits, positive for credits/refunds/bonuses.
    pub amount: Decimal,
    pub kind: String,
    pub description: String,
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Filter + paging for `list_transactions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxQuery {
    pub kind: Option<TxKind>,
    pub limit: i64,
    pub offset: i64,
}

impl TxQuery {
    pub fn clamped(mut self) -> Self {
        if self.limit <= 0 || self.limit > 500 {
            self.limit = 50;
        }
        if self.offset < 0 {
            self.offset = 0;
        }
        self
    }
}
