//! Spyglass Host Daemon
//!
//! Accepts inbound remote-access connections, authenticates them with the
//! SRP password proof, and routes each one to an isolated per-session
//! worker process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sg_core::config::{self, HostConfig};
use sg_core::users::UserStore;
use sg_host::status::StatusServer;
use sg_host::worker::ProcessSpawner;
use sg_host::{HostServer, HostState};

#[derive(Parser)]
#[command(name = "sg-host")]
#[command(about = "Spyglass host daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Spyglass host starting...");

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                HostConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            HostConfig::default()
        }
    };

    // Override bind address if specified
    let bind_addr = args.bind.unwrap_or_else(|| config.bind_address.clone());

    // Load the credential store
    let users = match UserStore::load(&config.users_path) {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!("Failed to load users from {:?}: {}", config.users_path, e);
            UserStore::new()
        }
    };
    if users.is_empty() {
        tracing::warn!("No credentials configured - all connections will be rejected");
    } else {
        tracing::info!("Loaded {} accounts", users.len());
    }

    // Worker spawner for real session processes
    let spawner = Arc::new(ProcessSpawner::new(
        config.worker_path.clone(),
        config.channel_high_water,
    ));

    let state = Arc::new(HostState::new(config, users));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
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

        cancel_clone.cancel();
    });

    let server = HostServer::new(Arc::clone(&state), spawner, cancel.clone());

    // Status endpoint for management tooling
    let status = StatusServer::new(Arc::clone(&state), cancel.clone());
    tokio::spawn(async move {
        if let Err(e) = status.run().await {
            tracing::error!("Status endpoint failed: {}", e);
        }
    });

    tracing::info!("Starting host server on {}", bind_addr);
    server.run(&bind_addr).await?;

    tracing::info!("Host shutdown complete");
    Ok(())
}
