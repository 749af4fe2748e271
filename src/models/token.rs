//! Token model: durations, scopes, the persisted row, and the cached
//! descriptor used on the validation fast path.
//!
//! Expiration is always *derived* — `activated_at + duration` — and never
//! stored, so an unactivated token cannot expire. Every helper that touches
//! expiration takes `now` as an explicit parameter.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix for plaintext token secrets (versioned so the format can evolve).
const SECRET_PREFIX: &str = "tgp_v1_";

/// The fixed set of purchasable token durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenDuration {
    Hour,
    Day,
    Week,
    Month,
}

impl TokenDuration {
    pub fn hours(self) -> i32 {
        match self {
            TokenDuration::Hour => 1,
            TokenDuration::Day => 24,
            TokenDuration::Week => 168,
            TokenDuration::Month => 720,
        }
    }

    pub fn as_chrono(self) -> Duration {
        Duration::hours(self.hours() as i64)
    }

    /// Maps the persisted `duration_hours` column back to the enum.
    /// Unknown values mean a corrupted row, not a caller error.
    pub fn from_hours(hours: i32) -> Option<Self> {
        match hours {
            1 => Some(TokenDuration::Hour),
            24 => Some(TokenDuration::Day),
            168 => Some(TokenDuration::Week),
            720 => Some(TokenDuration::Month),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" | "hour" => Some(TokenDuration::Hour),
            "24h" | "day" => Some(TokenDuration::Day),
            "168h" | "week" => Some(TokenDuration::Week),
            "720h" | "month" => Some(TokenDuration::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenDuration::Hour => "1h",
            TokenDuration::Day => "24h",
            TokenDuration::Week => "168h",
            TokenDuration::Month => "720h",
        }
    }
}

/// Capability set granted to a token. Stored as text in the `scope` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Plain HTTP(S) proxying.
    Http,
    /// HTTP plus SOCKS5 tunneling.
    Socks,
    /// Everything, including UDP relay.
    Full,
}

impl Scope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Scope::Http),
            "socks" => Some(Scope::Socks),
            "full" => Some(Scope::Full),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Http => "http",
            Scope::Socks => "socks",
            Scope::Full => "full",
        }
    }
}

/// Persisted token row. Rows are never deleted — revoked and expired tokens
/// remain for audit and refund history.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub secret_hash: String,
    pub duration_hours: i32,
    pub scope: String,
    pub price_paid: rust_decimal::Decimal,
    pub activated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TokenRow {
    pub fn duration(&self) -> Option<TokenDuration> {
        TokenDuration::from_hours(self.duration_hours)
    }

    pub fn scope(&self) -> Option<Scope> {
        Scope::parse(&self.scope)
    }

    /// Derived expiration: `activated_at + duration`. `None` means the token
    /// has never been used and therefore cannot be expired.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
            .map(|t| t + Duration::hours(self.duration_hours as i64))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(exp) => now >= exp,
            None => false,
        }
    }

    /// Usable means: active, not revoked, not past derived expiration.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.revoked_at.is_none() && !self.is_expired(now)
    }
}

/// Cached descriptor mirrored into Redis on the validation fast path.
///
/// Only *activated* tokens are cached (an unactivated token has no derived
/// expiration to bound the TTL with). The cache is never authoritative: a
/// vanished or stale entry just sends the request down the store path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub token_id: Uuid,
    pub account_id: Uuid,
    pub scope: Scope,
    pub duration_hours: i32,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime in whole seconds, for use as the Redis TTL.
    /// Zero means "do not cache".
    pub fn ttl_secs(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.expires_at - now;
        remaining.num_seconds().max(0) as u64
    }
}

/// One-way digest of a token secret. Secrets are compared only by this hash;
/// the plaintext is returned to the caller exactly once at issue time.
pub fn secret_digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Redis key for the cached descriptor of a secret.
pub fn cache_key(secret_hash: &str) -> String {
    format!("tok:{}", secret_hash)
}

/// Generate a fresh high-entropy secret (32 random bytes, hex-encoded).
pub fn generate_secret() -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", SECRET_PREFIX, hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0).unwrap()
    }

    fn row(activated_at: Option<DateTime<Utc>>) -> TokenRow {
        TokenRow {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            secret_hash: "abc".into(),
            duration_hours: 24,
            scope: "http".into(),
            price_paid: Decimal::new(1200, 2),
            activated_at,
            is_active: true,
            revoked_at: None,
            created_at: at(0),
        }
    }

    #[test]
    fn unactivated_token_never_expires() {
        let t = row(None);
        assert_eq!(t.expires_at(), None);
        assert!(!t.is_expired(at(23)));
        assert!(t.is_usable(at(23)));
    }

    #[test]
    fn expiration_is_derived_from_activation() {
        let t = row(Some(at(1)));
        assert_eq!(t.expires_at(), Some(at(1) + Duration::hours(24)));
        assert!(t.is_usable(at(12)));
        assert!(t.is_expired(at(1) + Duration::hours(24)));
        assert!(!t.is_usable(at(1) + Duration::hours(25)));
    }

    #[test]
    fn revoked_token_is_unusable_even_before_expiry() {
        let mut t = row(Some(at(1)));
        t.is_active = false;
        t.revoked_at = Some(at(2));
        assert!(!t.is_usable(at(3)));
    }

    #[test]
    fn duration_hours_roundtrip() {
        for d in [
            TokenDuration::Hour,
            TokenDuration::Day,
            TokenDuration::Week,
            TokenDuration::Month,
        ] {
            assert_eq!(TokenDuration::from_hours(d.hours()), Some(d));
            assert_eq!(TokenDuration::parse(d.as_str()), Some(d));
        }
        assert_eq!(TokenDuration::from_hours(48), None);
        assert_eq!(TokenDuration::parse("2d"), None);
    }

    #[test]
    fn scope_parse_roundtrip() {
        for s in [Scope::Http, Scope::Socks, Scope::Full] {
            assert_eq!(Scope::parse(s.as_str()), Some(s));
        }
        assert_eq!(Scope::parse("admin"), None);
    }

    #[test]
    fn cached_token_ttl_is_clamped_at_zero() {
        let c = CachedToken {
            token_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            scope: Scope::Http,
            duration_hours: 24,
            expires_at: at(10),
        };
        assert_eq!(c.ttl_secs(at(9)), 3600);
        assert_eq!(c.ttl_secs(at(10)), 0);
        assert_eq!(c.ttl_secs(at(11)), 0);
        assert!(c.is_expired(at(10)));
        assert!(!c.is_expired(at(9)));
    }

    #[test]
    fn secret_digest_is_deterministic_and_hex() {
        let a = secret_digest("tgp_v1_deadbeef");
        let b = secret_digest("tgp_v1_deadbeef");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, secret_digest("tgp_v1_deadbeee"));
    }

    #[test]
    fn generated_secrets_are_unique_and_prefixed() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(a.starts_with("tgp_v1_"));
        // prefix + 64 hex chars
        assert_eq!(a.len(), 7 + 64);
    }
}
