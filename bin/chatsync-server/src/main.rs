//! chatsync-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables and the command line.
//! 2. Initialise structured tracing (JSON or pretty, optional rolling file).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use chatsync_core::SqliteStore;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;
use crate::state::AppState;

/// Chat session server with merge-by-id message sync.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Address to bind; overrides CHATSYNC_BIND.
    #[arg(long)]
    bind: Option<String>,

    /// SQLite URL of the durable store; overrides CHATSYNC_DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(bind) = cli.bind {
        cfg.bind_address = bind;
    }
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // The guard must outlive the server so buffered file logs are flushed.
    let _log_guard = init_tracing(&cfg);

    info!(version = env!("CARGO_PKG_VERSION"), "chatsync-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url).await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. HTTP server with graceful shutdown ──────────────────────────────────
    let addr: SocketAddr = cfg.bind_address.parse()?;
    info!(
        default_session_kind = %cfg.default_session_kind,
        swagger = cfg.enable_swagger,
        "configuration loaded"
    );
    let state = Arc::new(AppState::new(cfg, store));
    let app = routes::build(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("chatsync-server stopped");
    Ok(())
}

/// Install the global subscriber. Returns the file writer guard when
/// `CHATSYNC_LOG_DIR` is set.
fn init_tracing(cfg: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // RUST_LOG wins; otherwise CHATSYNC_LOG, warning loudly if it does not parse.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: CHATSYNC_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let stdout_layer = if cfg.log_json {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chatsync-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
