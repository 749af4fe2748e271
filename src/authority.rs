//! The Token Authority: issues, validates, and revokes access tokens.
//!
//! Issuance debits the ledger before anything is persisted; validation runs
//! cache-then-store with idempotent first-use activation and delegates device
//! binding to the Session Guard; revocation is a conditional single-row
//! update followed by a prorated refund.
//!
//! All expiration and proration math takes `now` as an explicit parameter —
//! only the outermost handlers and jobs read the process clock.

use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::TokenCache;
use crate::errors::AppError;
use crate::ledger::Ledger;
use crate::models::token::{
    cache_key, generate_secret, secret_digest, CachedToken, Scope, TokenDuration, TokenRow,
};
use crate::pricing;
use crate::sessions::{BindOutcome, SessionGuard};
use crate::store::postgres::{NewToken, PgStore};

/// A freshly issued token. The plaintext secret appears here and nowhere
/// else — only its digest is persisted.
#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub token_id: Uuid,
    pub account_id: Uuid,
    pub secret: String,
    pub duration: TokenDuration,
    pub scope: Scope,
    pub price: Decimal,
}

/// Successful authorization descriptor handed back to the proxy layer.
#[derive(Debug, Serialize)]
pub struct Authorization {
    pub account_id: Uuid,
    pub token_id: Uuid,
    pub scope: Scope,
    pub session_id: Uuid,
}

/// Result of a revocation. `revoked == false` means the token was already
/// revoked and this call was a no-op (zero refund, no new transaction).
#[derive(Debug, Serialize)]
pub struct RevokeOutcome {
    pub token_id: Uuid,
    pub revoked: bool,
    pub refund: Decimal,
}

/// Bound a store future on the validation path. Timeouts degrade to
/// `Unavailable` so callers can retry with backoff instead of mistaking a
/// slow store for an invalid token.
pub(crate) async fn bounded<T, E>(
    limit: StdDuration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, AppError>
where
    AppError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(AppError::from(e)),
        Err(_) => Err(AppError::Unavailable),
    }
}

/// Refund proportional to unused duration, truncated toward zero at balance
/// scale so a refund can never exceed the prorated share.
pub fn prorated_refund(price_paid: Decimal, total: Duration, unused: Duration) -> Decimal {
    let total_secs = total.num_seconds();
    if total_secs <= 0 {
        return Decimal::ZERO;
    }
    let unused_secs = unused.num_seconds().clamp(0, total_secs);
    let refund = price_paid * Decimal::from(unused_secs) / Decimal::from(total_secs);
    refund.trunc_with_scale(2)
}

#[derive(Clone)]
pub struct TokenAuthority {
    store: PgStore,
    cache: TokenCache,
    ledger: Ledger,
    sessions: SessionGuard,
    store_timeout: StdDuration,
}

impl TokenAuthority {
    pub fn new(
        store: PgStore,
        cache: TokenCache,
        ledger: Ledger,
        sessions: SessionGuard,
        store_timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            cache,
            ledger,
            sessions,
            store_timeout,
        }
    }

    /// Issue a token for the account, charging the pricing-table amount.
    /// A failed debit aborts the whole operation; no token is persisted.
    pub async fn issue(
        &self,
        account_id: Uuid,
        duration: TokenDuration,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AppError> {
        let price = pricing::price(duration, scope);
        let token_id = Uuid::new_v4();

        self.ledger
            .debit(
                account_id,
                price,
                crate::models::ledger::TxKind::Debit,
                &format!("token {} ({} {})", token_id, duration.as_str(), scope.as_str()),
                now,
            )
            .await?;

        let secret = generate_secret();
        let new_token = NewToken {
            id: token_id,
            account_id,
            secret_hash: secret_digest(&secret),
            duration_hours: duration.hours(),
            scope: scope.as_str().to_string(),
            price_paid: price,
            created_at: now,
        };

        if let Err(e) = self.store.insert_token(&new_token).await {
            // The debit already committed; hand the money back before
            // surfacing the failure.
            tracing::error!(%token_id, "token insert failed after debit: {}", e);
            if let Err(credit_err) = self
                .ledger
                .credit(
                    account_id,
                    price,
                    crate::models::ledger::TxKind::Refund,
                    &format!("issue rollback for token {}", token_id),
                    None,
                    now,
                )
                .await
            {
                tracing::error!(
                    %account_id,
                    "issue rollback credit failed, needs reconciliation: {}",
                    credit_err
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            %token_id,
            %account_id,
            duration = duration.as_str(),
            scope = scope.as_str(),
            %price,
            "token issued"
        );

        Ok(IssuedToken {
            token_id,
            account_id,
            secret,
            duration,
            scope,
            price,
        })
    }

    /// Validate a secret for a device: cache fast path, store slow path with
    /// idempotent first-use activation, then device binding.
    pub async fn validate(
        &self,
        secret: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Authorization, AppError> {
        // Rejected before any token lookup — a distinct failure from an
        // invalid secret.
        if device_id.trim().is_empty() {
            return Err(AppError::MissingDeviceId);
        }

        let digest = secret_digest(secret);
        let key = cache_key(&digest);

        let descriptor = match self.cache.get(&key, now).await {
            Some(cached) => cached,
            None => self.lookup_and_activate(&digest, &key, now).await?,
        };

        // Device binding is a store call on the validation path too, so it
        // carries the same bound as the token lookup above.
        match bounded(
            self.store_timeout,
            self.sessions.bind(descriptor.token_id, device_id, now),
        )
        .await?
        {
            BindOutcome::Ok { session_id } => Ok(Authorization {
                account_id: descriptor.account_id,
                token_id: descriptor.token_id,
                scope: descriptor.scope,
                session_id,
            }),
            BindOutcome::Conflict {
                bound_device,
                last_activity,
            } => Err(AppError::DeviceConflict {
                bound_device,
                last_activity,
            }),
        }
    }

    /// Slow path: authoritative store lookup, first-use activation, cache
    /// repopulation. Store timeouts surface as `Unavailable`, never as an
    /// invalid token.
    async fn lookup_and_activate(
        &self,
        digest: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<CachedToken, AppError> {
        let row = bounded(self.store_timeout, self.store.find_token_by_secret_hash(digest))
            .await?
            .ok_or(AppError::NotFound)?;

        if !row.is_usable(now) {
            return Err(AppError::Expired);
        }

        let row = match row.activated_at {
            Some(_) => row,
            None => self.activate(row, now).await?,
        };

        // is_usable() above guarantees the token is unexpired, and activation
        // sets the timestamp, so the derived expiration exists here.
        let expires_at = row.expires_at().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("activated token without expiration"))
        })?;

        let scope = row
            .scope()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown scope on token row")))?;

        let descriptor = CachedToken {
            token_id: row.id,
            account_id: row.account_id,
            scope,
            duration_hours: row.duration_hours,
            expires_at,
        };
        self.cache.put(key, &descriptor, now).await;

        Ok(descriptor)
    }

    /// First-use activation. The store write is idempotent; losing the race
    /// means another validation activated first, so re-read for the
    /// authoritative timestamp instead of assuming ours.
    async fn activate(&self, row: TokenRow, now: DateTime<Utc>) -> Result<TokenRow, AppError> {
        let won = bounded(self.store_timeout, self.store.activate_token(row.id, now)).await?;
        if won {
            tracing::info!(token_id = %row.id, "token activated on first use");
            return Ok(TokenRow {
                activated_at: Some(now),
                ..row
            });
        }

        let row = bounded(self.store_timeout, self.store.get_token(row.id))
            .await?
            .ok_or(AppError::NotFound)?;
        if !row.is_usable(now) {
            return Err(AppError::Expired);
        }
        Ok(row)
    }

    /// Revoke a token and credit the prorated refund. Double revoke is a
    /// no-op returning zero refund; a failed refund leaves the token revoked
    /// and surfaces as `RefundFailed` for out-of-band reconciliation.
    pub async fn revoke(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<RevokeOutcome, AppError> {
        let Some(row) = self.store.revoke_token(token_id, now).await? else {
            // Not currently active: either already revoked or never existed.
            // Distinguish so an unknown id still reads as an error.
            if self.store.get_token(token_id).await?.is_none() {
                return Err(AppError::NotFound);
            }
            return Ok(RevokeOutcome {
                token_id,
                revoked: false,
                refund: Decimal::ZERO,
            });
        };

        // The revocation is committed: from here on, nothing may stand
        // between the caller and the refund. Cache drop and session teardown
        // are both best-effort — the idle sweep reaps any session this
        // fails to close, and the cache entry expires with the token.
        self.cache.invalidate(&cache_key(&row.secret_hash)).await;
        if let Err(e) = self.sessions.close(token_id, now).await {
            tracing::error!(%token_id, "session close failed during revoke: {}", e);
        }

        let total = Duration::hours(row.duration_hours as i64);
        let unused = match row.expires_at() {
            // Never activated: the clock never started, refund in full.
            None => total,
            Some(expires_at) => (expires_at - now).max(Duration::zero()),
        };
        let refund = prorated_refund(row.price_paid, total, unused);

        if refund > Decimal::ZERO {
            if let Err(e) = self
                .ledger
                .credit(
                    row.account_id,
                    refund,
                    crate::models::ledger::TxKind::Refund,
                    &format!("refund for token {}", token_id),
                    None,
                    now,
                )
                .await
            {
                tracing::error!(%token_id, %refund, "refund credit failed: {}", e);
                return Err(AppError::RefundFailed { token_id, refund });
            }
        }

        tracing::info!(%token_id, %refund, "token revoked");
        Ok(RevokeOutcome {
            token_id,
            revoked: true,
            refund,
        })
    }

}
