use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::timeout;

use crate::models::token::CachedToken;

/// Two-tier cache for validated token descriptors: in-memory DashMap
/// (tier 1) backed by Redis (tier 2). Postgres stays the source of truth —
/// an absent or vanished entry just sends the request down the store path,
/// so every operation here is best-effort.
///
/// All Redis calls are bounded by `op_timeout`; a slow or dead Redis
/// degrades reads to a miss and makes writes/invalidations no-ops.
#[derive(Clone)]
pub struct TokenCache {
    local: Arc<DashMap<String, CachedToken>>,
    redis: ConnectionManager,
    op_timeout: Duration,
}

impl TokenCache {
    pub fn new(redis: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis,
            op_timeout,
        }
    }

    /// Look up the descriptor for a secret hash. Entries past their derived
    /// expiration are treated as absent and evicted from the local tier.
    pub async fn get(&self, key: &str, now: chrono::DateTime<chrono::Utc>) -> Option<CachedToken> {
        // tier 1: in-memory
        if let Some(entry) = self.local.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.clone());
            }
            drop(entry);
            self.local.remove(key);
        }

        // tier 2: redis, bounded — a timeout is a miss, not a failure
        let mut conn = self.redis.clone();
        let fetched = match timeout(self.op_timeout, conn.get::<_, Option<String>>(key)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!("cache read failed, degrading to store path: {}", e);
                return None;
            }
            Err(_) => {
                tracing::warn!("cache read timed out, degrading to store path");
                return None;
            }
        };

        let raw = fetched?;
        let cached: CachedToken = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                // A malformed payload is a bug or a schema drift, not a miss —
                // log it loudly, then fall through to the store.
                tracing::error!(key, "undecodable cache payload: {}", e);
                return None;
            }
        };

        if cached.is_expired(now) {
            return None;
        }
        self.local.insert(key.to_string(), cached.clone());
        Some(cached)
    }

    /// Store a descriptor with a TTL bounded by its derived expiration.
    /// Descriptors at or past expiration are not cached at all.
    pub async fn put(&self, key: &str, value: &CachedToken, now: chrono::DateTime<chrono::Utc>) {
        let ttl_secs = value.ttl_secs(now);
        if ttl_secs == 0 {
            return;
        }

        self.local.insert(key.to_string(), value.clone());

        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("failed to encode cache payload: {}", e);
                return;
            }
        };
        let mut conn = self.redis.clone();
        match timeout(self.op_timeout, conn.set_ex::<_, _, ()>(key, json, ttl_secs)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("cache write failed: {}", e),
            Err(_) => tracing::warn!("cache write timed out"),
        }
    }

    /// Drop the entry from both tiers. Absence is not an error.
    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);

        let mut conn = self.redis.clone();
        match timeout(self.op_timeout, conn.del::<_, ()>(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("cache invalidation failed: {}", e),
            Err(_) => tracing::warn!("cache invalidation timed out"),
        }
    }

    /// Remove locally-expired entries. Called from the background sweep to
    /// bound memory usage; Redis expires its own keys via TTL.
    pub fn evict_expired(&self, now: chrono::DateTime<chrono::Utc>) -> usize {
        // Counted inside the retain pass: the map is shared, so len() deltas
        // taken around it can race with concurrent inserts.
        let mut evicted = 0usize;
        self.local.retain(|_, entry| {
            if entry.is_expired(now) {
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Current number of entries in the local tier (for debugging).
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
