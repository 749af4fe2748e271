use clap::{Parser, Subcommand};

/// Tollgate — access-control core for a token-gated proxy platform
#[derive(Parser)]
#[command(name = "tollgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8440")]
        port: u16,
    },

    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Manage access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account with zero balance
    Create,
    /// Show an account's balance
    Balance {
        #[arg(long)]
        account_id: String,
    },
    /// Credit an account (manual top-up / promotional bonus)
    Topup {
        #[arg(long)]
        account_id: String,
        #[arg(long)]
        amount: String,
        /// Record as a bonus instead of a deposit
        #[arg(long)]
        bonus: bool,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a new token (prints the secret exactly once)
    Issue {
        #[arg(long)]
        account_id: String,
        /// One of: 1h, 24h, 168h, 720h
        #[arg(long, default_value = "24h")]
        duration: String,
        /// One of: http, socks, full
        #[arg(long, default_value = "http")]
        scope: String,
    },
    /// List tokens for an account
    List {
        #[arg(long)]
        account_id: String,
    },
    /// Revoke a token and refund the unused share
    Revoke {
        #[arg(long)]
        token_id: String,
    },
}
