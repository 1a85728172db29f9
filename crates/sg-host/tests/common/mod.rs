//! Shared test harness: in-process fake workers behind the spawner seam
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sg_core::{HostConfig, SpawnError};
use sg_protocol::{ChannelMessage, MessageCodec, SessionKey};

use sg_host::channel;
use sg_host::worker::{WorkerLink, WorkerSpawner};

/// How a fake worker behaves after spawn
#[derive(Clone, Copy)]
pub enum WorkerMode {
    /// Signal readiness, then echo payloads and honor terminate
    Echo,
    /// Hold the channel open but never signal readiness
    Silent,
    /// Refuse to spawn at all
    Refuse,
}

/// In-process worker spawner for registry and server tests
pub struct FakeSpawner {
    mode: WorkerMode,
    spawned: AtomicUsize,
    /// Cancel one of these to simulate the worker dying mid-session
    crash_handles: Mutex<Vec<CancellationToken>>,
}

impl FakeSpawner {
    pub fn new(mode: WorkerMode) -> Self {
        Self {
            mode,
            spawned: AtomicUsize::new(0),
            crash_handles: Mutex::new(Vec::new()),
        }
    }

    /// Number of workers spawned so far
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Kill every live fake worker without a clean exit
    pub fn crash_all(&self) {
        for handle in self.crash_handles.lock().unwrap().drain(..) {
            handle.cancel();
        }
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(&self, _key: SessionKey) -> Result<WorkerLink, SpawnError> {
        if matches!(self.mode, WorkerMode::Refuse) {
            return Err(SpawnError::Start(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "worker binary missing",
            )));
        }

        self.spawned.fetch_add(1, Ordering::SeqCst);

        let (host_io, worker_io) = tokio::io::duplex(16 * 1024);
        let (host_read, host_write) = tokio::io::split(host_io);
        let pair = channel::open(host_read, host_write, 8);

        let kill = CancellationToken::new();
        let crash = CancellationToken::new();
        self.crash_handles.lock().unwrap().push(crash.clone());

        let mode = self.mode;
        let kill_watch = kill.clone();
        tokio::spawn(async move {
            let mut framed = Framed::new(worker_io, MessageCodec::<ChannelMessage>::new());

            if matches!(mode, WorkerMode::Silent) {
                tokio::select! {
                    _ = crash.cancelled() => {}
                    _ = kill_watch.cancelled() => {}
                }
                return;
            }

            if framed.send(ChannelMessage::Ready { pid: 4242 }).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = crash.cancelled() => return,
                    _ = kill_watch.cancelled() => return,
                    message = framed.next() => match message {
                        Some(Ok(ChannelMessage::Data(data))) => {
                            if framed.send(ChannelMessage::Data(data)).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(ChannelMessage::Terminate)) => {
                            let _ = framed.send(ChannelMessage::Exited { code: Some(0) }).await;
                            return;
                        }
                        Some(Ok(_)) => {}
                        _ => return,
                    },
                }
            }
        });

        Ok(WorkerLink {
            channel: pair,
            kill,
        })
    }
}

/// Config with short timeouts so lifecycle transitions are observable
pub fn test_config() -> HostConfig {
    HostConfig {
        spawn_timeout: Duration::from_millis(300),
        drain_grace: Duration::from_millis(300),
        shutdown_timeout: Duration::from_millis(100),
        channel_high_water: 8,
        max_auth_attempts: 3,
        ..HostConfig::default()
    }
}
