use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::models::ledger::TxKind;
use tollgate::models::token::{Scope, TokenDuration};
use tollgate::store::postgres::PgStore;
use tollgate::{api, cache::TokenCache, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tollgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Account { command }) => {
            let state = build_state(cfg).await?;
            handle_account_command(command, &state).await
        }
        Some(cli::Commands::Token { command }) => {
            let state = build_state(cfg).await?;
            handle_token_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Connect the store and cache clients and wire the component graph.
async fn build_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let db = PgStore::connect(&cfg.database_url).await?;

    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let cache = TokenCache::new(redis_conn, cfg.cache_timeout());

    Ok(Arc::new(AppState::new(db, cache, cfg)))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!("Connecting to Redis...");
    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let cache = TokenCache::new(redis_conn, cfg.cache_timeout());

    let sweep_interval = cfg.sweep_interval();
    let state = Arc::new(AppState::new(db, cache, cfg));

    // Idle-session reaper, decoupled from request traffic.
    jobs::sweep::spawn(state.sessions.clone(), state.cache.clone(), sweep_interval);
    tracing::info!(
        interval_secs = sweep_interval.as_secs(),
        idle_timeout_secs = state.config.idle_timeout_secs,
        "session sweep started"
    );

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .nest("/v1", api::api_router())
        .with_state(state)
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tollgate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Readiness: the store must answer, the cache is optional by design.
async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .map_err(|e| {
            tracing::error!("readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ok")
}

async fn handle_account_command(
    cmd: cli::AccountCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::AccountCommands::Create => {
            let account = state.db.create_account(Utc::now()).await?;
            println!("Account created: {}", account.id);
        }
        cli::AccountCommands::Balance { account_id } => {
            let id = uuid::Uuid::parse_str(&account_id).context("Invalid account_id")?;
            let account = state
                .db
                .get_account(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Account not found: {}", id))?;
            println!("Balance: {}", account.balance);
        }
        cli::AccountCommands::Topup {
            account_id,
            amount,
            bonus,
        } => {
            let id = uuid::Uuid::parse_str(&account_id).context("Invalid account_id")?;
            let amount: rust_decimal::Decimal = amount.parse().context("Invalid amount")?;
            let kind = if bonus { TxKind::Bonus } else { TxKind::Credit };
            state
                .ledger
                .credit(id, amount, kind, "manual top-up", None, Utc::now())
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Credited {} to {}", amount, id);
        }
    }
    Ok(())
}

async fn handle_token_command(
    cmd: cli::TokenCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue {
            account_id,
            duration,
            scope,
        } => {
            let account_id = uuid::Uuid::parse_str(&account_id).context("Invalid account_id")?;
            let duration = TokenDuration::parse(&duration)
                .ok_or_else(|| anyhow::anyhow!("Invalid duration: {}", duration))?;
            let scope =
                Scope::parse(&scope).ok_or_else(|| anyhow::anyhow!("Invalid scope: {}", scope))?;

            let issued = state
                .authority
                .issue(account_id, duration, scope, Utc::now())
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;

            println!("Token issued: {}", issued.token_id);
            println!("Price:        {}", issued.price);
            println!("Secret (shown once, store it now):");
            println!("  {}", issued.secret);
        }
        cli::TokenCommands::List { account_id } => {
            let id = uuid::Uuid::parse_str(&account_id).context("Invalid account_id")?;
            let tokens = state.db.list_tokens(id).await?;
            for t in tokens {
                let status = if !t.is_active {
                    "revoked"
                } else if t.is_expired(Utc::now()) {
                    "expired"
                } else if t.activated_at.is_none() {
                    "unused"
                } else {
                    "active"
                };
                println!(
                    "{}  {:>5}h  {:<5}  {:<8}  paid {}",
                    t.id, t.duration_hours, t.scope, status, t.price_paid
                );
            }
        }
        cli::TokenCommands::Revoke { token_id } => {
            let id = uuid::Uuid::parse_str(&token_id).context("Invalid token_id")?;
            let outcome = state
                .authority
                .revoke(id, Utc::now())
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            if outcome.revoked {
                println!("Token {} revoked, refunded {}", outcome.token_id, outcome.refund);
            } else {
                println!("Token {} was already revoked (no refund)", outcome.token_id);
            }
        }
    }
    Ok(())
}
