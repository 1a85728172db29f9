//! Worker process spawning and supervision
//!
//! `WorkerSpawner` is the seam between the registry and whatever starts a
//! worker: the production implementation forks the `sg-worker` binary with
//! its channel on stdio, tests substitute in-process fakes. The isolation
//! contract lives at this seam: one process per session key, running under
//! the user context of the target OS session.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use sg_core::SpawnError;
use sg_protocol::SessionKey;

use crate::channel::{self, ChannelPair};

/// A spawned worker: its channel plus a hard-kill handle
pub struct WorkerLink {
    /// The open session channel
    pub channel: ChannelPair,
    /// Cancel to forcibly terminate the worker after a graceful ask fails
    pub kill: CancellationToken,
}

/// Starts worker processes for the registry
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Spawn a worker for the given session key.
    ///
    /// Returns as soon as the process is started; readiness arrives later
    /// as a channel event and is the registry's to time out.
    async fn spawn(&self, key: SessionKey) -> Result<WorkerLink, SpawnError>;
}

/// Production spawner: runs the worker binary with its channel on stdio
pub struct ProcessSpawner {
    worker_path: PathBuf,
    high_water: usize,
}

impl ProcessSpawner {
    /// Create a spawner for the given worker binary
    pub fn new(worker_path: PathBuf, high_water: usize) -> Self {
        Self {
            worker_path,
            high_water,
        }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, key: SessionKey) -> Result<WorkerLink, SpawnError> {
        let mut child = Command::new(&self.worker_path)
            .arg("--os-session")
            .arg(key.os_session.as_u32().to_string())
            .arg("--kind")
            .arg(key.kind.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(SpawnError::Start)?;

        tracing::info!(
            "Spawned worker for {} (pid {:?})",
            key,
            child.id()
        );

        let stdin = child.stdin.take().expect("worker stdin is piped");
        let stdout = child.stdout.take().expect("worker stdout is piped");
        let channel = channel::open(stdout, stdin, self.high_water);

        let kill = CancellationToken::new();
        let kill_watch = kill.clone();
        tokio::spawn(async move {
            let exited = tokio::select! {
                _ = kill_watch.cancelled() => false,
                _ = child.wait() => true,
            };
            if !exited {
                tracing::warn!("Force-killing worker for {}", key);
                let _ = child.start_kill();
                let _ = child.wait().await;
            } else {
                tracing::debug!("Worker for {} exited", key);
            }
        });

        Ok(WorkerLink { channel, kill })
    }
}
