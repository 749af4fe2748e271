//! Background job: reap idle sessions.
//!
//! Runs on a fixed interval, decoupled from request traffic, and is the only
//! path by which a session ends without an explicit revoke or client close.
//! Also evicts expired entries from the local cache tier while it is at it.

use std::time::Duration;

use tokio::time;

use crate::cache::TokenCache;
use crate::sessions::SessionGuard;

/// Spawn the sweep task. Call this once at startup; the interval is
/// validated by config to be strictly shorter than the idle timeout.
pub fn spawn(guard: SessionGuard, cache: TokenCache, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // Skip the tick burst after a stalled runtime instead of replaying it.
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();

            if let Err(e) = guard.sweep(now).await {
                tracing::error!("session sweep failed: {}", e);
            }

            let evicted = cache.evict_expired(now);
            if evicted > 0 {
                tracing::debug!(evicted, "evicted expired local cache entries");
            }
        }
    });
}
