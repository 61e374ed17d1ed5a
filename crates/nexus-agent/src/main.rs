//! Nexus Agent Daemon
//!
//! Runs on a target host, owns its PTY sessions, and keeps a single
//! outbound link to the hub with reconnecting backoff.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexus_agent::AgentRuntime;
use nexus_core::config::AgentConfig;

#[derive(Parser)]
#[command(name = "nexus-agent")]
#[command(about = "Nexus host agent daemon")]
#[command(version)]
struct Args {
    /// Hub websocket URL (overrides NEXUS_HUB_URL)
    #[arg(long)]
    hub: Option<String>,

    /// Display name to register under (overrides WORKER_NAME)
    #[arg(long)]
    name: Option<String>,

    /// Shared agent credential (overrides WORKER_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Spawn shells as this user (overrides RUN_AS_USER)
    #[arg(long)]
    run_as: Option<String>,

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

    tracing::info!("Nexus Agent starting...");

    // Environment configuration with command-line overrides.
    let mut config = AgentConfig::from_env();
    if let Some(hub) = args.hub {
        config.hub_url = hub;
    }
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(token) = args.token {
        config.worker_token = Some(token);
    }
    if let Some(run_as) = args.run_as {
        config.run_as_user = Some(run_as);
    }

    let runtime = AgentRuntime::new(config);
    tracing::info!("Registering as {}", runtime.name());

    runtime.run().await
}
