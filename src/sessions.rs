//! The Session Guard: enforces "one token, one concurrent device".
//!
//! Per token the state machine is NoSession → Bound(device) → NoSession,
//! with no intermediate states. The transition itself is a single atomic
//! upsert in Postgres (see `PgStore::bind_session`); this module adds the
//! outcome types, conflict detail, and the idle sweep around it.
//!
//! Binding the conflict check to the *token* (not the device) lets the same
//! device reconnect seamlessly after a timeout while strictly preventing two
//! simultaneously-live devices from sharing one token.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::store::postgres::PgStore;

/// Result of a bind attempt. Conflict carries enough detail for the caller
/// to wait out or contact the holding device.
#[derive(Debug)]
pub enum BindOutcome {
    /// Session created or heartbeat applied; the device owns the token.
    Ok { session_id: Uuid },
    /// Another device holds the session; nothing was mutated. Detail is
    /// `None` when the holder vanished between the refused upsert and the
    /// follow-up read.
    Conflict {
        bound_device: Option<String>,
        last_activity: Option<DateTime<Utc>>,
    },
}

#[derive(Clone)]
pub struct SessionGuard {
    store: PgStore,
    idle_timeout: Duration,
}

impl SessionGuard {
    pub fn new(store: PgStore, idle_timeout: Duration) -> Self {
        Self {
            store,
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Bind `device_id` to the token, or heartbeat its existing session.
    ///
    /// The check-then-act is one conditional upsert keyed on the partial
    /// unique index, so two concurrent binds with different devices cannot
    /// both win — the store serializes them and exactly one creates the row.
    pub async fn bind(
        &self,
        token_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, AppError> {
        if let Some(session_id) = self.store.bind_session(token_id, device_id, now).await? {
            return Ok(BindOutcome::Ok { session_id });
        }

        // The upsert refused: an active session for a different device holds
        // the token. Fetch it for conflict detail — purely informational, the
        // decision was already made atomically above.
        match self.store.active_session(token_id).await? {
            Some(session) => {
                tracing::warn!(
                    %token_id,
                    device = device_id,
                    bound_device = %session.device_id,
                    "device conflict"
                );
                Ok(BindOutcome::Conflict {
                    bound_device: Some(session.device_id),
                    last_activity: Some(session.last_activity_at),
                })
            }
            // The holder vanished between the upsert and this read (closed or
            // swept). The next attempt will bind cleanly; report the conflict
            // without fabricating detail rather than retrying inline.
            None => Ok(BindOutcome::Conflict {
                bound_device: None,
                last_activity: None,
            }),
        }
    }

    /// Close sessions idle past the configured threshold, freeing their
    /// tokens for a new device. Returns how many were closed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff = now - self.idle_timeout;
        let closed = self.store.close_idle_sessions(cutoff, now).await?;
        if closed > 0 {
            tracing::info!(closed, "idle session sweep");
        }
        Ok(closed)
    }

    /// Explicit teardown on revocation or client close. Idempotent.
    pub async fn close(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        let closed = self.store.close_sessions(token_id, now).await?;
        if closed > 0 {
            tracing::info!(%token_id, "session closed");
        }
        Ok(())
    }

    /// Attribute proxied bytes to the token's active session.
    pub async fn record_traffic(&self, token_id: Uuid, bytes: i64) -> Result<bool, AppError> {
        Ok(self.store.record_traffic(token_id, bytes).await?)
    }
}
