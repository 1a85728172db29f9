//! Spyglass Session Worker
//!
//! One process per active remote session, spawned by the host under the
//! target user's context with the session channel on stdio. Logs go to
//! stderr; stdout belongs to the channel.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sg_protocol::SessionKind;
use sg_worker::{run_session, service_for};

#[derive(Parser)]
#[command(name = "sg-worker")]
#[command(about = "Spyglass session worker")]
#[command(version)]
struct Args {
    /// Target interactive OS session ID
    #[arg(long)]
    os_session: u32,

    /// Session kind (desktop-manage, desktop-view, file-transfer)
    #[arg(long)]
    kind: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the channel; all logging goes to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let kind: SessionKind = args
        .kind
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("invalid --kind")?;

    tracing::info!(
        "Worker starting for OS session {} ({})",
        args.os_session,
        kind
    );

    let service = service_for(kind);
    run_session(tokio::io::stdin(), tokio::io::stdout(), service).await?;

    tracing::info!("Worker exiting");
    Ok(())
}
