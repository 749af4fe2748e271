use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the core API router. All routes are relative — the caller mounts
/// this under `/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // authorization path used by the proxy layer on every request
        .route("/authorize", post(handlers::authorize))
        // token lifecycle
        .route("/tokens", post(handlers::issue_token))
        .route("/tokens/:id", get(handlers::get_token).delete(handlers::revoke_token))
        .route("/tokens/:id/session", delete(handlers::close_session))
        .route("/tokens/:id/traffic", post(handlers::record_traffic))
        // accounts and ledger
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/:id/balance", get(handlers::get_balance))
        .route("/accounts/:id/deposits", post(handlers::confirm_deposit))
        .route("/accounts/:id/transactions", get(handlers::list_transactions))
        .layer(TraceLayer::new_for_http())
}
