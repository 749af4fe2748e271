//! Session model: the binding between a token and the single device
//! currently allowed to use it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Persisted session row. At most one row per token may have
/// `is_active = true` — enforced by a partial unique index in Postgres,
/// never by in-process locking.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub token_id: Uuid,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub bytes_counter: i64,
    pub request_counter: i64,
}

impl SessionRow {
    /// True when the session has seen no activity for longer than
    /// `idle_timeout` and should be reaped by the sweep.
    ///
    /// The sweep itself reaps in bulk via [`PgStore::close_idle_sessions`],
    /// whose `last_activity_at < now - idle_timeout` clause is this same
    /// predicate; the two must stay in sync.
    ///
    /// [`PgStore::close_idle_sessions`]: crate::store::postgres::PgStore::close_idle_sessions
    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        self.is_active && now - self.last_activity_at > idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, min, 0).unwrap()
    }

    fn session(last_activity: DateTime<Utc>, active: bool) -> SessionRow {
        SessionRow {
            id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            device_id: "dev-a".into(),
            started_at: at(0),
            last_activity_at: last_activity,
            ended_at: None,
            is_active: active,
            bytes_counter: 0,
            request_counter: 1,
        }
    }

    #[test]
    fn idle_only_after_threshold() {
        let timeout = Duration::minutes(5);
        assert!(!session(at(10), true).is_idle(at(14), timeout));
        // exactly at the threshold is not yet idle
        assert!(!session(at(10), true).is_idle(at(15), timeout));
        assert!(session(at(10), true).is_idle(at(16), timeout));
    }

    #[test]
    fn ended_session_is_never_idle() {
        let timeout = Duration::minutes(5);
        assert!(!session(at(0), false).is_idle(at(30), timeout));
    }
}
