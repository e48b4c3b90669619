//! Shipdesk Server
//!
//! Serves the messaging layer of the shipment back office:
//!
//! 1. **Shipment threads**: per-shipment discussion with cursor-paginated
//!    history, read positions and a server-sent event stream.
//!
//! 2. **Conversations**: group and direct chat with delivery/read status,
//!    folder views, incremental sync and WebSocket push.
//!
//! Authentication happens upstream; requests arrive with the user id in the
//! `x-user-id` header.

use std::time::Duration;

use clap::Parser;

use shipdesk::storage::Database;
use shipdesk::{router, AppState, ServerConfig};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "shipdesk", version, about = "Shipment back-office messaging server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// SQLite database file (":memory:" for a throwaway database)
    #[arg(long, default_value = "shipdesk.db", env = "DATABASE_PATH")]
    database_path: String,

    /// Lifetime of one shipment stream connection in seconds
    #[arg(long, default_value_t = 30, env = "STREAM_BUDGET_SECS")]
    stream_budget_secs: u64,

    /// Interval between shipment stream polls in milliseconds
    #[arg(long, default_value_t = 800, env = "STREAM_POLL_MS")]
    stream_poll_ms: u64,

    /// Reconnect delay advertised to stream clients in milliseconds
    #[arg(long, default_value_t = 3000, env = "STREAM_RETRY_MS")]
    stream_retry_ms: u64,

    /// Public URL prefix of the blob store serving profile pictures
    #[arg(long, default_value = "/storage", env = "STORAGE_URL")]
    storage_url: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false, env = "LOG_JSON")]
    json_logs: bool,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shipdesk=info,tower_http=info".into());
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig {
        port: args.port,
        database_path: args.database_path,
        stream_budget: Duration::from_secs(args.stream_budget_secs),
        stream_poll_interval: Duration::from_millis(args.stream_poll_ms),
        stream_retry: Duration::from_millis(args.stream_retry_ms),
        storage_url: args.storage_url,
    };

    let db = match Database::open(Some(&config.database_path)) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(path = config.database_path.as_str(), error = %e, "Failed to open database");
            std::process::exit(1);
        }
    };
    tracing::info!(path = config.database_path.as_str(), "Database ready");

    let addr = format!("0.0.0.0:{}", config.port);
    let app = router(AppState::new(db, config));

    tracing::info!("Shipdesk server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
