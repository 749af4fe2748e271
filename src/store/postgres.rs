//! Postgres store: the single source of truth for accounts, tokens, and
//! sessions, and the sole arbiter of the uniqueness invariants.
//!
//! Everything here is a single statement or a single transaction — all
//! cross-request coordination lives in the database (row locks and the
//! partial unique index on active sessions), never in process memory,
//! because multiple service instances run against the same store.
//!
//! Methods return `sqlx::Result` so callers can map infrastructure failures
//! to `Unavailable` without conflating them with business outcomes.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ledger::AccountRow;
use crate::models::session::SessionRow;
use crate::models::token::TokenRow;

const TOKEN_COLUMNS: &str = "id, account_id, secret_hash, duration_hours, scope, price_paid, \
     activated_at, is_active, revoked_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Insert payload for a freshly issued token.
pub struct NewToken {
    pub id: Uuid,
    pub account_id: Uuid,
    pub secret_hash: String,
    pub duration_hours: i32,
    pub scope: String,
    pub price_paid: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Account Operations --

    pub async fn create_account(&self, now: DateTime<Utc>) -> sqlx::Result<AccountRow> {
        sqlx::query_as::<_, AccountRow>(
            "INSERT INTO accounts (id, balance, created_at) VALUES ($1, 0, $2) \
             RETURNING id, balance, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_account(&self, id: Uuid) -> sqlx::Result<Option<AccountRow>> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, balance, created_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    // -- Token Operations --

    pub async fn insert_token(&self, token: &NewToken) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO tokens (id, account_id, secret_hash, duration_hours, scope, price_paid, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(token.id)
        .bind(token.account_id)
        .bind(&token.secret_hash)
        .bind(token.duration_hours)
        .bind(&token.scope)
        .bind(token.price_paid)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_token(&self, id: Uuid) -> sqlx::Result<Option<TokenRow>> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_token_by_secret_hash(&self, hash: &str) -> sqlx::Result<Option<TokenRow>> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE secret_hash = $1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_tokens(&self, account_id: Uuid) -> sqlx::Result<Vec<TokenRow>> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE account_id = $1 ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
    }

    /// First-use activation. The `activated_at IS NULL` guard makes this
    /// idempotent under concurrent validation races: at most one of the
    /// racing writers records a timestamp, the rest see zero rows affected.
    pub async fn activate_token(&self, id: Uuid, now: DateTime<Utc>) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE tokens SET activated_at = $2 WHERE id = $1 AND activated_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Conditional revocation: flips the token off only if it is still
    /// active, returning the pre-revocation state needed for the refund.
    /// `None` means the token was already revoked (or never existed) —
    /// double revoke is a no-op for the caller.
    pub async fn revoke_token(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<TokenRow>> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "UPDATE tokens SET is_active = FALSE, revoked_at = $2 \
             WHERE id = $1 AND is_active = TRUE AND revoked_at IS NULL \
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    // -- Session Operations --

    /// Atomic check-then-act for device binding, in one conditional upsert
    /// against the `sessions_one_active` partial unique index:
    ///   * no active session       → a row is inserted (first bind)
    ///   * same device holds it    → heartbeat: last_activity_at bumped,
    ///                               request_counter incremented
    ///   * different device holds  → the DO UPDATE's WHERE clause excludes
    ///                               the row, nothing changes, `None`
    ///
    /// Two concurrent binds for the same token serialize on the index;
    /// exactly one can create the active row.
    pub async fn bind_session(
        &self,
        token_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO sessions (id, token_id, device_id, started_at, last_activity_at, is_active, bytes_counter, request_counter) \
             VALUES ($1, $2, $3, $4, $4, TRUE, 0, 1) \
             ON CONFLICT (token_id) WHERE is_active \
             DO UPDATE SET last_activity_at = EXCLUDED.last_activity_at, \
                           request_counter = sessions.request_counter + 1 \
             WHERE sessions.device_id = EXCLUDED.device_id \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(token_id)
        .bind(device_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn active_session(&self, token_id: Uuid) -> sqlx::Result<Option<SessionRow>> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT id, token_id, device_id, started_at, last_activity_at, ended_at, \
                    is_active, bytes_counter, request_counter \
             FROM sessions WHERE token_id = $1 AND is_active = TRUE",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Close any active session for the token. Idempotent.
    pub async fn close_sessions(&self, token_id: Uuid, now: DateTime<Utc>) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE, ended_at = $2 \
             WHERE token_id = $1 AND is_active = TRUE",
        )
        .bind(token_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Close every active session whose last activity predates `cutoff`
    /// (`now - idle_timeout`, computed by the caller). The WHERE clause is
    /// the SQL form of [`SessionRow::is_idle`]; keep the two in sync.
    ///
    /// [`SessionRow::is_idle`]: crate::models::session::SessionRow::is_idle
    pub async fn close_idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE, ended_at = $2 \
             WHERE is_active = TRUE AND last_activity_at < $1",
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Add proxied traffic to the active session's byte counter. Reported
    /// by the data path after the fact; a session that already ended just
    /// drops the sample.
    pub async fn record_traffic(&self, token_id: Uuid, bytes: i64) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET bytes_counter = bytes_counter + $2 \
             WHERE token_id = $1 AND is_active = TRUE",
        )
        .bind(token_id)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
