//! Per-session registry state

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sg_core::HostError;
use sg_protocol::{ChannelMessage, CloseReason, SessionKey};

use crate::channel::ChannelSender;

/// Fan-out queue depth for worker output to attached connections.
/// A connection that lags this far behind is disconnected.
pub(crate) const OUTPUT_QUEUE: usize = 256;

/// Identifier of one connection's attachment to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Allocate a fresh attachment ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Worker spawned, waiting for readiness
    Pending,
    /// Worker ready, channel open
    Active,
    /// Last connection detached; grace timer running
    Draining,
}

impl SessionState {
    /// Stable name for snapshots and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker output fanned out to every attached connection
#[derive(Debug, Clone)]
pub enum SessionOutput {
    /// Opaque protocol payload from the worker
    Data(Bytes),
    /// The session ended; every attachment must close with this reason
    Closed(CloseReason),
}

/// A connection's live handle into a session.
///
/// `to_worker` preserves this connection's frame order and suspends under
/// channel backpressure; `output` delivers worker data and, exactly once,
/// the close notification.
pub struct Attachment {
    /// This attachment's identity, used to detach
    pub id: AttachmentId,
    /// The session attached to
    pub key: SessionKey,
    /// Payload path to the worker
    pub to_worker: ChannelSender,
    /// Worker output and close notifications
    pub output: broadcast::Receiver<SessionOutput>,
}

/// One registry entry, owned exclusively by the actor
pub(crate) struct SessionEntry {
    pub key: SessionKey,
    pub owner: String,
    /// Guards against stale timer/router commands after a respawn
    pub epoch: u64,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub data: ChannelSender,
    pub control: mpsc::Sender<ChannelMessage>,
    pub kill: CancellationToken,
    pub output: broadcast::Sender<SessionOutput>,
    pub attachments: HashSet<AttachmentId>,
    /// Attach requests parked while the worker is still Pending
    pub waiters: Vec<oneshot::Sender<Result<Attachment, HostError>>>,
    /// Running drain-grace timer, aborted on reattach
    pub grace: Option<tokio::task::JoinHandle<()>>,
    /// Bumped on each drain start so an aborted-but-already-queued grace
    /// expiry from an earlier drain cannot kill a revived session
    pub drain_seq: u64,
}

impl SessionEntry {
    /// Attach one more connection and hand it its handles
    pub fn attach(&mut self) -> Attachment {
        let id = AttachmentId::new();
        self.attachments.insert(id);
        Attachment {
            id,
            key: self.key,
            to_worker: self.data.clone(),
            output: self.output.subscribe(),
        }
    }

    /// Abort a running grace timer, if any
    pub fn cancel_grace(&mut self) {
        if let Some(timer) = self.grace.take() {
            timer.abort();
        }
    }
}
