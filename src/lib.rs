//! Tollgate — access-control core for a token-gated proxy platform.
//!
//! Issues, validates, and revokes time-bounded access tokens; enforces one
//! active device per token; and keeps an atomic currency ledger that funds
//! issuance and computes prorated refunds. Postgres is the single source of
//! truth; Redis is a pure optimization on the validation path.

pub mod api;
pub mod authority;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod ledger;
pub mod models;
pub mod pricing;
pub mod sessions;
pub mod store;

use authority::TokenAuthority;
use cache::TokenCache;
use ledger::Ledger;
use sessions::SessionGuard;
use store::postgres::PgStore;

/// Shared application state passed to handlers.
pub struct AppState {
    pub db: PgStore,
    pub cache: TokenCache,
    pub ledger: Ledger,
    pub sessions: SessionGuard,
    pub authority: TokenAuthority,
    pub config: config::Config,
}

impl AppState {
    /// Wire the component graph from connected store and cache clients.
    pub fn new(db: PgStore, cache: TokenCache, config: config::Config) -> Self {
        let ledger = Ledger::new(db.pool().clone());
        let sessions = SessionGuard::new(db.clone(), config.idle_timeout());
        let authority = TokenAuthority::new(
            db.clone(),
            cache.clone(),
            ledger.clone(),
            sessions.clone(),
            config.store_timeout(),
        );
        Self {
            db,
            cache,
            ledger,
            sessions,
            authority,
            config,
        }
    }
}
