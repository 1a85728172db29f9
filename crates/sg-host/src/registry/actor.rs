//! Registry actor: the single mutation path for session lifecycle
//!
//! Every create/attach/detach/terminate, every timer expiry, and every OS
//! session event is a command on one queue, processed one at a time. That
//! serialization is what resolves descriptor races: two connections
//! requesting the same key are ordered here, and exactly one spawn happens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use sg_core::{ChannelError, HostConfig, HostError, SpawnError};
use sg_protocol::{ChannelMessage, CloseReason, SessionKey, SessionStatusEvent};

use crate::channel::ChannelEvent;
use crate::registry::session::{
    Attachment, AttachmentId, SessionEntry, SessionOutput, SessionState, OUTPUT_QUEUE,
};
use crate::registry::snapshot::{SessionInfo, SessionSnapshot};
use crate::worker::{WorkerLink, WorkerSpawner};

/// Command queue depth for the actor
const COMMAND_QUEUE: usize = 256;

enum RegistryCommand {
    /// Attach a connection to the session for `key`, creating it if needed
    Attach {
        key: SessionKey,
        owner: String,
        reply: oneshot::Sender<Result<Attachment, HostError>>,
    },
    /// A connection detached
    Detach { key: SessionKey, id: AttachmentId },
    /// An OS session status transition arrived from the monitor
    Event { event: SessionStatusEvent },
    /// The worker for (key, epoch) signaled readiness
    WorkerReady {
        key: SessionKey,
        epoch: u64,
        pid: u32,
    },
    /// The worker for (key, epoch) exited or its channel broke
    WorkerGone {
        key: SessionKey,
        epoch: u64,
        error: Option<ChannelError>,
    },
    /// The spawn-readiness window for (key, epoch) elapsed
    SpawnTimedOut { key: SessionKey, epoch: u64 },
    /// The drain grace period for (key, epoch) elapsed
    GraceExpired {
        key: SessionKey,
        epoch: u64,
        seq: u64,
    },
    /// Terminate every session, then reply
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable handle to the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Attach to the session for `key`, spawning its worker if absent.
    ///
    /// Resolves once the worker is ready (or known failed); while a spawn
    /// is in flight, additional attach requests park on the same readiness
    /// wait instead of spawning again.
    pub async fn attach(&self, key: SessionKey, owner: &str) -> Result<Attachment, HostError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Attach {
                key,
                owner: owner.to_string(),
                reply,
            })
            .await
            .map_err(|_| HostError::Channel(ChannelError::Closed))?;
        rx.await
            .map_err(|_| HostError::Channel(ChannelError::Closed))?
    }

    /// Detach a connection from its session
    pub async fn detach(&self, key: SessionKey, id: AttachmentId) {
        let _ = self.tx.send(RegistryCommand::Detach { key, id }).await;
    }

    /// Feed an OS session status event into the registry
    pub async fn session_event(&self, event: SessionStatusEvent) {
        let _ = self.tx.send(RegistryCommand::Event { event }).await;
    }

    /// Terminate every session; resolves when all have been asked to exit
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(RegistryCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Start the registry actor; returns its handle
pub fn spawn_registry(
    config: HostConfig,
    spawner: Arc<dyn WorkerSpawner>,
    snapshot: SessionSnapshot,
) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let actor = Actor {
        config,
        spawner,
        snapshot,
        sessions: HashMap::new(),
        next_epoch: 1,
        shutting_down: false,
        tx: tx.clone(),
    };
    tokio::spawn(actor.run(rx));
    RegistryHandle { tx }
}

struct Actor {
    config: HostConfig,
    spawner: Arc<dyn WorkerSpawner>,
    snapshot: SessionSnapshot,
    sessions: HashMap<SessionKey, SessionEntry>,
    next_epoch: u64,
    shutting_down: bool,
    /// Self-handle for timers and session routers
    tx: mpsc::Sender<RegistryCommand>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<RegistryCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RegistryCommand::Attach { key, owner, reply } => {
                    self.handle_attach(key, owner, reply).await;
                }
                RegistryCommand::Detach { key, id } => self.handle_detach(key, id),
                RegistryCommand::Event { event } => self.handle_event(event),
                RegistryCommand::WorkerReady { key, epoch, pid } => {
                    self.handle_ready(key, epoch, pid);
                }
                RegistryCommand::WorkerGone { key, epoch, error } => {
                    self.handle_gone(key, epoch, error);
                }
                RegistryCommand::SpawnTimedOut { key, epoch } => {
                    self.handle_spawn_timeout(key, epoch);
                }
                RegistryCommand::GraceExpired { key, epoch, seq } => {
                    self.handle_grace_expired(key, epoch, seq);
                }
                RegistryCommand::Shutdown { reply } => {
                    self.handle_shutdown();
                    let _ = reply.send(());
                }
            }
        }
    }

    async fn handle_attach(
        &mut self,
        key: SessionKey,
        owner: String,
        reply: oneshot::Sender<Result<Attachment, HostError>>,
    ) {
        if self.shutting_down {
            let _ = reply.send(Err(HostError::Channel(ChannelError::Closed)));
            return;
        }

        if let Some(entry) = self.sessions.get_mut(&key) {
            match entry.state {
                SessionState::Pending => {
                    // Worker still starting; park on the same readiness wait
                    entry.waiters.push(reply);
                }
                SessionState::Active => {
                    let attachment = entry.attach();
                    let id = attachment.id;
                    if reply.send(Ok(attachment)).is_err() {
                        entry.attachments.remove(&id);
                    }
                    self.publish(&key);
                }
                SessionState::Draining => {
                    entry.cancel_grace();
                    entry.state = SessionState::Active;
                    let attachment = entry.attach();
                    let id = attachment.id;
                    tracing::info!("Session {} revived from draining", key);
                    if reply.send(Ok(attachment)).is_err() {
                        entry.attachments.remove(&id);
                    }
                    self.publish(&key);
                    self.drain_if_empty(key);
                }
            }
            return;
        }

        if let Some(max) = self.config.max_sessions {
            if self.sessions.len() >= max as usize {
                let _ = reply.send(Err(SpawnError::LimitReached.into()));
                return;
            }
        }

        match self.spawner.spawn(key).await {
            Err(e) => {
                tracing::warn!("Worker spawn for {} failed: {}", key, e);
                let _ = reply.send(Err(e.into()));
            }
            Ok(link) => {
                let epoch = self.next_epoch;
                self.next_epoch += 1;
                self.install_session(key, owner, epoch, link, reply);
            }
        }
    }

    fn install_session(
        &mut self,
        key: SessionKey,
        owner: String,
        epoch: u64,
        link: WorkerLink,
        reply: oneshot::Sender<Result<Attachment, HostError>>,
    ) {
        let (output, _) = broadcast::channel(OUTPUT_QUEUE);

        tokio::spawn(run_session_router(
            key,
            epoch,
            link.channel.events,
            output.clone(),
            self.tx.clone(),
        ));

        // The readiness window is a registry command like any other
        let spawn_timeout = self.config.spawn_timeout;
        let timeout_tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(spawn_timeout).await;
            let _ = timeout_tx
                .send(RegistryCommand::SpawnTimedOut { key, epoch })
                .await;
        });

        let entry = SessionEntry {
            key,
            owner,
            epoch,
            state: SessionState::Pending,
            pid: None,
            data: link.channel.data,
            control: link.channel.control,
            kill: link.kill,
            output,
            attachments: Default::default(),
            waiters: vec![reply],
            grace: None,
            drain_seq: 0,
        };
        self.sessions.insert(key, entry);
        self.publish(&key);
        tracing::info!("Session {} created (epoch {})", key, epoch);
    }

    fn handle_ready(&mut self, key: SessionKey, epoch: u64, pid: u32) {
        let Some(entry) = self.sessions.get_mut(&key) else {
            return;
        };
        if entry.epoch != epoch || entry.state != SessionState::Pending {
            return;
        }

        entry.state = SessionState::Active;
        entry.pid = Some(pid);
        tracing::info!("Session {} active (worker pid {})", key, pid);

        for waiter in std::mem::take(&mut entry.waiters) {
            let attachment = entry.attach();
            let id = attachment.id;
            if waiter.send(Ok(attachment)).is_err() {
                // The requesting connection went away while we spawned
                entry.attachments.remove(&id);
            }
        }
        self.publish(&key);
        self.drain_if_empty(key);
    }

    fn handle_detach(&mut self, key: SessionKey, id: AttachmentId) {
        let Some(entry) = self.sessions.get_mut(&key) else {
            return;
        };
        if !entry.attachments.remove(&id) {
            return;
        }
        tracing::debug!("Connection {} detached from {}", id, key);

        self.drain_if_empty(key);
        self.publish(&key);
    }

    /// Move an active session with no attachments into `Draining` and
    /// start its grace timer
    fn drain_if_empty(&mut self, key: SessionKey) {
        let Some(entry) = self.sessions.get_mut(&key) else {
            return;
        };
        if !entry.attachments.is_empty() || entry.state != SessionState::Active {
            return;
        }

        entry.state = SessionState::Draining;
        entry.drain_seq += 1;
        let epoch = entry.epoch;
        let seq = entry.drain_seq;
        let grace = self.config.drain_grace;
        let grace_tx = self.tx.clone();
        entry.grace = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = grace_tx
                .send(RegistryCommand::GraceExpired { key, epoch, seq })
                .await;
        }));
        tracing::info!("Session {} draining (grace {:?})", key, grace);
        self.publish(&key);
    }

    fn handle_grace_expired(&mut self, key: SessionKey, epoch: u64, seq: u64) {
        let matches = self
            .sessions
            .get(&key)
            .map(|e| {
                e.epoch == epoch && e.drain_seq == seq && e.state == SessionState::Draining
            })
            .unwrap_or(false);
        if matches {
            tracing::info!("Session {} drain grace expired", key);
            self.terminate(key, CloseReason::SessionTerminated);
        }
    }

    fn handle_spawn_timeout(&mut self, key: SessionKey, epoch: u64) {
        let matches = self
            .sessions
            .get(&key)
            .map(|e| e.epoch == epoch && e.state == SessionState::Pending)
            .unwrap_or(false);
        if !matches {
            return;
        }

        tracing::warn!("Session {} worker never signaled readiness", key);
        if let Some(mut entry) = self.sessions.remove(&key) {
            for waiter in std::mem::take(&mut entry.waiters) {
                let _ = waiter.send(Err(SpawnError::ReadinessTimeout {
                    timeout_secs: self.config.spawn_timeout.as_secs(),
                }
                .into()));
            }
            entry.kill.cancel();
            self.snapshot.remove(&key);
        }
    }

    fn handle_gone(&mut self, key: SessionKey, epoch: u64, error: Option<ChannelError>) {
        let matches = self
            .sessions
            .get(&key)
            .map(|e| e.epoch == epoch)
            .unwrap_or(false);
        if !matches {
            return;
        }

        let reason = match &error {
            Some(e) => {
                tracing::warn!("Session {} channel failed: {}", key, e);
                CloseReason::ChannelFailed
            }
            None => {
                tracing::info!("Session {} worker exited", key);
                CloseReason::SessionTerminated
            }
        };

        if let Some(mut entry) = self.sessions.remove(&key) {
            entry.cancel_grace();
            for waiter in std::mem::take(&mut entry.waiters) {
                let _ = waiter.send(Err(SpawnError::EarlyExit.into()));
            }
            let _ = entry.output.send(SessionOutput::Closed(reason));
            entry.kill.cancel();
            self.snapshot.remove(&key);
        }
    }

    fn handle_event(&mut self, event: SessionStatusEvent) {
        let keys: Vec<SessionKey> = self
            .sessions
            .keys()
            .filter(|k| k.os_session == event.os_session)
            .copied()
            .collect();
        if keys.is_empty() {
            return;
        }

        if event.status.is_terminal() {
            tracing::info!(
                "OS session {} reported {}; terminating {} session(s)",
                event.os_session,
                event.status,
                keys.len()
            );
            for key in keys {
                self.terminate(key, CloseReason::SessionTerminated);
            }
        } else {
            for key in keys {
                if let Some(entry) = self.sessions.get(&key) {
                    let _ = entry
                        .control
                        .try_send(ChannelMessage::Status(event.status));
                }
            }
        }
    }

    fn handle_shutdown(&mut self) {
        self.shutting_down = true;
        let keys: Vec<SessionKey> = self.sessions.keys().copied().collect();
        for key in keys {
            self.terminate(key, CloseReason::ServerShutdown);
        }
    }

    /// Tear a session down: notify attachments, ask the worker to exit,
    /// and schedule the force-kill for when the ask goes unanswered.
    fn terminate(&mut self, key: SessionKey, reason: CloseReason) {
        let Some(mut entry) = self.sessions.remove(&key) else {
            return;
        };
        entry.cancel_grace();

        for waiter in std::mem::take(&mut entry.waiters) {
            let _ = waiter.send(Err(SpawnError::EarlyExit.into()));
        }
        let _ = entry.output.send(SessionOutput::Closed(reason));
        let _ = entry.control.try_send(ChannelMessage::Terminate);

        let kill = entry.kill.clone();
        let grace = self.config.shutdown_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            kill.cancel();
        });

        self.snapshot.remove(&key);
        tracing::info!("Session {} terminated ({})", key, reason);
    }

    /// Mirror one entry into the read-only snapshot
    fn publish(&self, key: &SessionKey) {
        if let Some(entry) = self.sessions.get(key) {
            self.snapshot.upsert(
                *key,
                SessionInfo {
                    os_session: key.os_session.as_u32(),
                    kind: key.kind.as_str().to_string(),
                    owner: entry.owner.clone(),
                    state: entry.state.as_str().to_string(),
                    pid: entry.pid,
                    clients: entry.attachments.len(),
                },
            );
        }
    }
}

/// Per-session router: channel events in, fan-out and lifecycle commands out.
///
/// Runs off the actor so a busy session never stalls registry mutations.
async fn run_session_router(
    key: SessionKey,
    epoch: u64,
    mut events: mpsc::Receiver<ChannelEvent>,
    output: broadcast::Sender<SessionOutput>,
    registry: mpsc::Sender<RegistryCommand>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Ready { pid } => {
                let _ = registry
                    .send(RegistryCommand::WorkerReady { key, epoch, pid })
                    .await;
            }
            ChannelEvent::Data(data) => {
                // No receivers just means nobody is attached right now
                let _ = output.send(SessionOutput::Data(data));
            }
            ChannelEvent::Exited { .. } => {
                let _ = registry
                    .send(RegistryCommand::WorkerGone {
                        key,
                        epoch,
                        error: None,
                    })
                    .await;
                return;
            }
            ChannelEvent::Failed(error) => {
                let _ = registry
                    .send(RegistryCommand::WorkerGone {
                        key,
                        epoch,
                        error: Some(error),
                    })
                    .await;
                return;
            }
        }
    }

    // Event stream ended without a terminal event
    let _ = registry
        .send(RegistryCommand::WorkerGone {
            key,
            epoch,
            error: Some(ChannelError::Broken("channel tasks ended".to_string())),
        })
        .await;
}
