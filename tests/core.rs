//! Integration tests for the access-control core's pure surface.
//!
//! These exercise the library crate the way the HTTP layer does: refund
//! math, derived expiration, cache descriptor semantics, the error
//! taxonomy, and request parsing — everything that does not need a live
//! Postgres/Redis. The store-level invariants (partial unique index on
//! active sessions, balance CHECK) are declared in migrations/ and
//! exercised against a real database in deployment smoke tests.

mod refund_tests {
    use chrono::Duration;
    use rust_decimal::Decimal;
    use tollgate::authority::prorated_refund;
    use tollgate::models::token::{Scope, TokenDuration};
    use tollgate::pricing::price;

    fn dec(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    /// Issue at price P, revoke before activation: refund is exactly P.
    #[test]
    fn unactivated_token_refunds_full_price() {
        for d in [
            TokenDuration::Hour,
            TokenDuration::Day,
            TokenDuration::Week,
            TokenDuration::Month,
        ] {
            for s in [Scope::Http, Scope::Socks, Scope::Full] {
                let p = price(d, s);
                // never activated → unused == total
                assert_eq!(prorated_refund(p, d.as_chrono(), d.as_chrono()), p);
            }
        }
    }

    /// A 24h token priced 18.00, revoked at the halfway point, refunds
    /// exactly 9.00.
    #[test]
    fn day_token_half_elapsed_refunds_nine() {
        let p = price(TokenDuration::Day, Scope::Full);
        assert_eq!(p, dec(1800));

        let total = TokenDuration::Day.as_chrono();
        let unused = total - Duration::hours(12);
        assert_eq!(prorated_refund(p, total, unused), dec(900));
    }

    /// Rounding always truncates toward zero — the platform never
    /// over-refunds by a cent.
    #[test]
    fn refund_truncation_never_rounds_up() {
        let total = Duration::hours(24);
        for elapsed_secs in [1i64, 59, 3599, 86_399] {
            let unused = total - Duration::seconds(elapsed_secs);
            let refund = prorated_refund(dec(1800), total, unused);
            // exact rational value, scaled down without rounding
            let exact = Decimal::from(86_400 - elapsed_secs) * dec(1800) / Decimal::from(86_400);
            assert!(refund <= exact);
            assert!(exact - refund < dec(1));
        }
    }

    #[test]
    fn expired_token_refunds_zero() {
        let total = Duration::hours(24);
        assert_eq!(
            prorated_refund(dec(1800), total, Duration::seconds(-10)),
            Decimal::ZERO
        );
    }
}

mod expiration_tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use tollgate::models::token::{CachedToken, Scope, TokenRow};
    use uuid::Uuid;

    fn at(h: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, 0, 0).unwrap()
    }

    fn token(activated: Option<chrono::DateTime<Utc>>) -> TokenRow {
        TokenRow {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            secret_hash: "deadbeef".into(),
            duration_hours: 24,
            scope: "socks".into(),
            price_paid: Decimal::new(1500, 2),
            activated_at: activated,
            is_active: true,
            revoked_at: None,
            created_at: at(0),
        }
    }

    /// An issued-but-unused token has no expiration clock at all.
    #[test]
    fn expiration_only_exists_after_activation() {
        let t = token(None);
        assert_eq!(t.expires_at(), None);
        // even far in the future it is still usable
        assert!(t.is_usable(at(0) + Duration::days(365)));

        let t = token(Some(at(2)));
        assert_eq!(t.expires_at(), Some(at(2) + Duration::hours(24)));
    }

    /// The cache entry's TTL is bounded by the derived expiration, so a
    /// stale entry can never outlive its token.
    #[test]
    fn cache_ttl_tracks_remaining_lifetime() {
        let c = CachedToken {
            token_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            scope: Scope::Socks,
            duration_hours: 24,
            expires_at: at(12),
        };
        assert_eq!(c.ttl_secs(at(0)), 12 * 3600);
        assert_eq!(c.ttl_secs(at(12)), 0);
        assert_eq!(c.ttl_secs(at(13)), 0);
    }

    /// The cached descriptor is a fixed tagged structure: round-trips
    /// losslessly and rejects malformed payloads instead of yielding an
    /// empty value.
    #[test]
    fn cached_descriptor_serde_is_strict() {
        let c = CachedToken {
            token_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            scope: Scope::Full,
            duration_hours: 168,
            expires_at: at(5),
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: CachedToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token_id, c.token_id);
        assert_eq!(back.scope, c.scope);
        assert_eq!(back.expires_at, c.expires_at);

        // missing fields are a decode error, not a silent default
        assert!(serde_json::from_str::<CachedToken>(r#"{"token_id":"not-even-a-uuid"}"#).is_err());
        assert!(serde_json::from_str::<CachedToken>("{}").is_err());
    }
}

mod session_tests {
    use chrono::{Duration, TimeZone, Utc};
    use tollgate::models::session::SessionRow;
    use uuid::Uuid;

    fn at(min: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, min, 0).unwrap()
    }

    /// The sweep predicate: stale sessions are reaped, fresh and
    /// already-ended ones are left alone.
    #[test]
    fn sweep_predicate_selects_only_stale_active_sessions() {
        let timeout = Duration::minutes(5);
        let mut s = SessionRow {
            id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            device_id: "fp-1a2b".into(),
            started_at: at(0),
            last_activity_at: at(0),
            ended_at: None,
            is_active: true,
            bytes_counter: 4096,
            request_counter: 7,
        };

        assert!(!s.is_idle(at(4), timeout));
        assert!(s.is_idle(at(6), timeout));

        s.is_active = false;
        s.ended_at = Some(at(6));
        assert!(!s.is_idle(at(30), timeout));
    }
}

mod error_tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tollgate::errors::AppError;
    use uuid::Uuid;

    /// Business outcomes and infrastructure failures must be
    /// distinguishable: wait (conflict) vs top-up (funds) vs retry-later
    /// (unavailable).
    #[test]
    fn taxonomy_separates_business_from_infrastructure() {
        let conflict = AppError::DeviceConflict {
            bound_device: Some("fp-9f".into()),
            last_activity: Some(Utc::now()),
        }
        .into_response();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert!(!conflict.headers().contains_key("retry-after"));

        let funds = AppError::InsufficientFunds.into_response();
        assert_eq!(funds.status(), StatusCode::PAYMENT_REQUIRED);

        let unavailable = AppError::Unavailable.into_response();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(unavailable.headers().contains_key("retry-after"));
    }

    /// A store outage is never reported as a bad token.
    #[test]
    fn unavailable_is_not_unauthorized() {
        assert_eq!(
            AppError::NotFound.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_ne!(
            AppError::Unavailable.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    /// Missing device id is its own failure, distinct from token errors.
    #[test]
    fn missing_device_id_is_a_caller_error() {
        let resp = AppError::MissingDeviceId.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn refund_failure_is_surfaced_distinctly() {
        let err = AppError::RefundFailed {
            token_id: Uuid::new_v4(),
            refund: Decimal::new(450, 2),
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}

mod parsing_tests {
    use tollgate::models::ledger::TxKind;
    use tollgate::models::token::{secret_digest, Scope, TokenDuration};

    #[test]
    fn duration_and_scope_parse_the_documented_forms() {
        assert_eq!(TokenDuration::parse("24h"), Some(TokenDuration::Day));
        assert_eq!(TokenDuration::parse("day"), Some(TokenDuration::Day));
        assert_eq!(TokenDuration::parse("36h"), None);
        assert_eq!(TokenDuration::parse(""), None);

        assert_eq!(Scope::parse("socks"), Some(Scope::Socks));
        assert_eq!(Scope::parse("SOCKS"), None);
    }

    #[test]
    fn tx_kind_covers_the_ledger_taxonomy() {
        assert_eq!(TxKind::parse("credit"), Some(TxKind::Credit));
        assert_eq!(TxKind::parse("debit"), Some(TxKind::Debit));
        assert_eq!(TxKind::parse("refund"), Some(TxKind::Refund));
        assert_eq!(TxKind::parse("bonus"), Some(TxKind::Bonus));
        assert_eq!(TxKind::parse("withdrawal"), None);
    }

    /// The cache key is a one-way digest: distinct secrets never collide on
    /// the obvious prefixes, and the digest leaks nothing of the input.
    #[test]
    fn secret_digests_are_stable_and_distinct() {
        let a = secret_digest("tgp_v1_aaaa");
        let b = secret_digest("tgp_v1_aaab");
        assert_ne!(a, b);
        assert_eq!(a, secret_digest("tgp_v1_aaaa"));
        assert!(!a.contains("tgp"));
    }
}
