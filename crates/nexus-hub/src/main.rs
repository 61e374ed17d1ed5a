//! Nexus Hub Daemon
//!
//! Accepts authenticated browser clients and host agents, brokers
//! persistent terminal sessions between them, and survives restarts
//! without losing session identity or scrollback.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexus_core::config::HubConfig;
use nexus_core::error::FatalError;
use nexus_hub::http::build_router;
use nexus_hub::state::HubState;
use nexus_hub::store::Database;
use nexus_hub::sweeper;

#[derive(Parser)]
#[command(name = "nexus-hub")]
#[command(about = "Nexus hub daemon")]
#[command(version)]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Database path (overrides NEXUS_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory of static client assets (overrides NEXUS_STATIC_DIR)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Nexus Hub starting...");

    // Environment configuration with command-line overrides.
    let mut config = HubConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if let Some(static_dir) = args.static_dir {
        config.static_dir = Some(static_dir);
    }

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            let fatal = FatalError::Persistence(e.to_string());
            tracing::error!("{}", fatal);
            std::process::exit(fatal.exit_code());
        }
    };
    tracing::info!("Store opened at {}", config.database_path.display());

    let admin_password = config.admin_password.clone();
    let bind_addr = config.bind_address();

    let state = match HubState::new(config, db) {
        Ok(state) => Arc::new(state),
        Err(fatal) => {
            tracing::error!("{}", fatal);
            std::process::exit(fatal.exit_code());
        }
    };

    // First-boot bootstrap from ADMIN_PASSWORD, if provided.
    if let Some(password) = admin_password {
        match state.credentials.bootstrap(&password).await {
            Ok(true) => tracing::info!("Admin principal bootstrapped from ADMIN_PASSWORD"),
            Ok(false) => tracing::debug!("Admin principal already configured"),
            Err(e) => tracing::warn!("ADMIN_PASSWORD bootstrap failed: {}", e),
        }
    }

    let restored = state
        .sessions
        .load_all()
        .await
        .context("hydrating sessions from store")?;
    tracing::info!("Restored {} persisted sessions", restored);

    // Cancelling this token also closes every live link: per-connection
    // tokens are its children.
    let cancel = state.shutdown.clone();

    // Shutdown on Ctrl+C or SIGTERM.
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_signal.cancel();
    });

    let sweeper_task = sweeper::spawn(Arc::clone(&state), cancel.clone());
    let flusher_task = spawn_flusher(Arc::clone(&state), cancel.clone());

    let app = build_router(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let fatal = FatalError::Bind {
                addr: bind_addr.clone(),
                source: e,
            };
            tracing::error!("{}", fatal);
            std::process::exit(fatal.exit_code());
        }
    };
    tracing::info!("Listening on {}", bind_addr);

    let shutdown = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .context("serving")?;

    // Drain the background tasks, then flush once more: output can land
    // between the flusher's final pass and the last link closing.
    let _ = flusher_task.await;
    let _ = sweeper_task.await;
    state.sessions.flush_all().await;

    tracing::info!("Hub shutdown complete");
    Ok(())
}

fn spawn_flusher(
    state: Arc<HubState>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    state.sessions.flush_quiescent().await;
                }
                _ = cancel.cancelled() => {
                    state.sessions.flush_all().await;
                    tracing::debug!("Session flusher shutting down");
                    break;
                }
            }
        }
    })
}
