use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    /// Sessions with no activity for this long are closed by the sweep.
    /// Set via TOLLGATE_IDLE_TIMEOUT_SECS. Default: 300.
    pub idle_timeout_secs: u64,
    /// Cadence of the idle-session sweep. Must be strictly shorter than the
    /// idle timeout; load() clamps it if misconfigured.
    /// Set via TOLLGATE_SWEEP_INTERVAL_SECS. Default: 60.
    pub sweep_interval_secs: u64,
    /// Bound on store calls on the validation path. A store timeout fails
    /// the request as Unavailable. Set via TOLLGATE_STORE_TIMEOUT_MS.
    pub store_timeout_ms: u64,
    /// Bound on cache calls. A cache timeout degrades to the store path.
    /// Set via TOLLGATE_CACHE_TIMEOUT_MS.
    pub cache_timeout_ms: u64,
}

impl Config {
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let idle_timeout_secs = env_u64("TOLLGATE_IDLE_TIMEOUT_SECS", 300);
    let sweep_interval_secs = clamp_sweep_interval(
        env_u64("TOLLGATE_SWEEP_INTERVAL_SECS", 60),
        idle_timeout_secs,
    );

    Ok(Config {
        port: std::env::var("TOLLGATE_PORT")
            .unwrap_or_else(|_| "8440".into())
            .parse()
            .unwrap_or(8440),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/tollgate".into()),
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
        idle_timeout_secs,
        sweep_interval_secs,
        store_timeout_ms: env_u64("TOLLGATE_STORE_TIMEOUT_MS", 5000),
        cache_timeout_ms: env_u64("TOLLGATE_CACHE_TIMEOUT_MS", 250),
    })
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// The sweep must run more often than sessions time out, or an idle session
/// could linger for almost two timeout windows.
fn clamp_sweep_interval(interval: u64, idle_timeout: u64) -> u64 {
    if interval >= idle_timeout {
        let clamped = (idle_timeout / 2).max(1);
        tracing::warn!(
            interval,
            idle_timeout,
            clamped,
            "sweep interval must be shorter than the idle timeout, clamping"
        );
        clamped
    } else {
        interval.max(1)
    }
}
