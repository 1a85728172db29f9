//! Connection accept loop
//!
//! Binding the listen address is the only fatal startup error. Each
//! accepted connection gets its own task; the registry actor serializes
//! everything those tasks do to session state.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use sg_core::HostError;

use crate::monitor::{channel_monitor, EventFeed};
use crate::registry::{spawn_registry, RegistryHandle};
use crate::server::connection;
use crate::state::HostState;
use crate::worker::WorkerSpawner;

/// Monitor event queue depth
const MONITOR_QUEUE: usize = 64;

/// The host server: accepts connections and wires them into the registry
pub struct HostServer {
    state: Arc<HostState>,
    registry: RegistryHandle,
    feed: EventFeed,
    cancel: CancellationToken,
}

impl HostServer {
    /// Create a server around loaded state and a worker spawner.
    ///
    /// Starts the registry actor and the monitor pump; the listener starts
    /// in [`run`](Self::run) or [`serve`](Self::serve).
    pub fn new(
        state: Arc<HostState>,
        spawner: Arc<dyn WorkerSpawner>,
        cancel: CancellationToken,
    ) -> Self {
        let registry = spawn_registry(
            state.config.clone(),
            spawner,
            state.snapshot.clone(),
        );

        let (feed, mut monitor) = channel_monitor(MONITOR_QUEUE);
        let pump = registry.clone();
        tokio::spawn(async move {
            use crate::monitor::SessionMonitor;
            while let Some(event) = monitor.recv().await {
                pump.session_event(event).await;
            }
        });

        Self {
            state,
            registry,
            feed,
            cancel,
        }
    }

    /// Push handle for OS session status events
    pub fn event_feed(&self) -> EventFeed {
        self.feed.clone()
    }

    /// Handle to the session registry
    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    /// Bind the configured address and serve until stopped
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until stopped.
    ///
    /// On shutdown every session is drained and terminated before the
    /// listener (and with it the bound address) is released.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Host server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Host server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        self.registry.shutdown().await;
        drop(listener);
        Ok(())
    }

    /// Stop the server: idempotent, safe from a signal path.
    ///
    /// Cancels the accept loop and drains every session; returns once all
    /// workers have been asked to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.registry.shutdown().await;
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection from {}", peer_addr);

        let state = Arc::clone(&self.state);
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            match connection::handle_connection(socket, peer_addr, state, registry, cancel).await
            {
                Ok(()) => {
                    tracing::info!("Connection from {} closed", peer_addr);
                }
                Err(HostError::Auth(e)) => {
                    tracing::warn!("Connection from {} failed auth: {}", peer_addr, e);
                }
                Err(e) => {
                    tracing::warn!("Connection from {} closed with error: {}", peer_addr, e);
                }
            }
        });
    }
}
