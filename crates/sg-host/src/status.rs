//! Localhost status endpoint
//!
//! Read-only snapshot queries for management tooling: newline-delimited
//! JSON over TCP on 127.0.0.1. Nothing here can mutate the registry; the
//! endpoint reads the snapshot the actor maintains.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::registry::SessionInfo;
use crate::state::HostState;

/// Request from a status client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusRequest {
    /// Host overview
    GetStatus,
    /// Active session table
    ListSessions,
}

/// Response to a status client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusResponse {
    /// Host overview
    Status(HostStatus),
    /// Active session table
    Sessions { sessions: Vec<SessionInfo> },
    /// Malformed request
    Error { message: String },
}

/// Host overview information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    /// Host version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Number of active sessions
    pub session_count: usize,
    /// Network bind address
    pub bind_address: String,
}

/// Status endpoint server, localhost only
pub struct StatusServer {
    state: Arc<HostState>,
    start_time: Instant,
    cancel: CancellationToken,
}

impl StatusServer {
    /// Create a status server over shared host state
    pub fn new(state: Arc<HostState>, cancel: CancellationToken) -> Self {
        Self {
            state,
            start_time: Instant::now(),
            cancel,
        }
    }

    /// Serve until cancelled
    pub async fn run(&self) -> Result<()> {
        let address = self.state.config.status_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind status endpoint to {}", address))?;

        tracing::info!("Status endpoint listening on {}", address);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Status endpoint shutting down");
                    return Ok(());
                }

                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        // Only accept connections from localhost
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost status client {}", peer_addr);
                            continue;
                        }
                        let state = Arc::clone(&self.state);
                        let start_time = self.start_time;
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, state, start_time).await {
                                tracing::debug!("Status client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept status connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<HostState>,
    start_time: Instant,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<StatusRequest>(&line) {
            Ok(StatusRequest::GetStatus) => StatusResponse::Status(HostStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: start_time.elapsed().as_secs(),
                session_count: state.snapshot.len(),
                bind_address: state.config.bind_address.clone(),
            }),
            Ok(StatusRequest::ListSessions) => StatusResponse::Sessions {
                sessions: state.snapshot.list(),
            },
            Err(e) => StatusResponse::Error {
                message: format!("bad request: {}", e),
            },
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }

    Ok(())
}
