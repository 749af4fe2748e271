use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ledger::{TransactionRow, TxKind, TxQuery};
use crate::models::token::{Scope, TokenDuration, TokenRow};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct AuthorizeRequest {
    pub secret: String,
    pub device_id: Option<String>,
}

#[derive(Deserialize)]
pub struct IssueTokenRequest {
    pub account_id: Uuid,
    /// One of "1h", "24h", "168h", "720h".
    pub duration: String,
    /// One of "http", "socks", "full".
    pub scope: String,
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    /// Correlation id from the payment gateway.
    pub external_ref: Option<String>,
}

#[derive(Deserialize)]
pub struct TrafficRequest {
    pub bytes: i64,
}

#[derive(Deserialize)]
pub struct TxListParams {
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
}

/// Token metadata for callers. Carries the derived expiration but never the
/// secret or its hash.
#[derive(Serialize)]
pub struct TokenResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub duration: String,
    pub scope: String,
    pub price_paid: Decimal,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<TokenRow> for TokenResponse {
    fn from(row: TokenRow) -> Self {
        let expires_at = row.expires_at();
        let duration = row
            .duration()
            .map(|d| d.as_str().to_string())
            .unwrap_or_else(|| format!("{}h", row.duration_hours));
        TokenResponse {
            id: row.id,
            account_id: row.account_id,
            duration,
            scope: row.scope,
            price_paid: row.price_paid,
            activated_at: row.activated_at,
            expires_at,
            is_active: row.is_active,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        }
    }
}

// ── Authorization ────────────────────────────────────────────

/// POST /v1/authorize — the per-request check the proxy layer calls with a
/// token secret and a device fingerprint.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AuthorizeRequest>,
) -> Result<Json<crate::authority::Authorization>, AppError> {
    let device_id = payload.device_id.unwrap_or_default();
    let auth = state
        .authority
        .validate(&payload.secret, &device_id, Utc::now())
        .await?;
    Ok(Json(auth))
}

// ── Token lifecycle ──────────────────────────────────────────

/// POST /v1/tokens — issue a token, debiting the account. The response is
/// the only place the plaintext secret ever appears.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<crate::authority::IssuedToken>), AppError> {
    let duration = TokenDuration::parse(&payload.duration)
        .ok_or_else(|| AppError::InvalidRequest(format!("unknown duration '{}'", payload.duration)))?;
    let scope = Scope::parse(&payload.scope)
        .ok_or_else(|| AppError::InvalidRequest(format!("unknown scope '{}'", payload.scope)))?;

    let issued = state
        .authority
        .issue(payload.account_id, duration, scope, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// GET /v1/tokens/:id — token metadata.
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TokenResponse>, AppError> {
    let row = state.db.get_token(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(row.into()))
}

/// DELETE /v1/tokens/:id — revoke and refund.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::authority::RevokeOutcome>, AppError> {
    let outcome = state.authority.revoke(id, Utc::now()).await?;
    Ok(Json(outcome))
}

/// DELETE /v1/tokens/:id/session — client-initiated close, freeing the token
/// for another device immediately.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.close(id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/tokens/:id/traffic — data path reports proxied bytes for the
/// active session.
pub async fn record_traffic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TrafficRequest>,
) -> Result<StatusCode, AppError> {
    if payload.bytes < 0 {
        return Err(AppError::InvalidRequest("bytes must not be negative".into()));
    }
    let recorded = state.sessions.record_traffic(id, payload.bytes).await?;
    Ok(if recorded {
        StatusCode::NO_CONTENT
    } else {
        // No active session — the sample is dropped, not an error.
        StatusCode::ACCEPTED
    })
}

// ── Accounts & ledger ────────────────────────────────────────

/// POST /v1/accounts — create an account with zero balance.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<BalanceResponse>), AppError> {
    let account = state.db.create_account(Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(BalanceResponse {
            account_id: account.id,
            balance: account.balance,
        }),
    ))
}

/// GET /v1/accounts/:id/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = state.db.get_account(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(BalanceResponse {
        account_id: account.id,
        balance: account.balance,
    }))
}

/// POST /v1/accounts/:id/deposits — confirmation hook for the external
/// payment gateway; credits the ledger with the gateway's correlation id.
pub async fn confirm_deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DepositRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::InvalidRequest("deposit amount must be positive".into()));
    }

    state
        .ledger
        .credit(
            id,
            payload.amount,
            TxKind::Credit,
            "deposit",
            payload.external_ref.as_deref(),
            Utc::now(),
        )
        .await?;

    let account = state.db.get_account(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(BalanceResponse {
        account_id: account.id,
        balance: account.balance,
    }))
}

/// GET /v1/accounts/:id/transactions?kind=&limit=&offset=
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<TxListParams>,
) -> Result<Json<Vec<TransactionRow>>, AppError> {
    let kind = match params.kind.as_deref() {
        Some(s) => Some(
            TxKind::parse(s)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown kind '{}'", s)))?,
        ),
        None => None,
    };

    let rows = state
        .ledger
        .list_transactions(
            id,
            TxQuery {
                kind,
                limit: params.limit.unwrap_or(50),
                offset: params.offset.unwrap_or(0),
            },
        )
        .await?;
    Ok(Json(rows))
}
