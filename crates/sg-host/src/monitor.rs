//! OS session monitor boundary
//!
//! The host consumes `SessionStatusEvent`s and nothing else; where they
//! come from is platform glue behind the `SessionMonitor` trait. The
//! shipped implementation is a channel pair: platform code (or a test)
//! pushes events through an `EventFeed`, the host drains the monitor.

use async_trait::async_trait;
use tokio::sync::mpsc;

use sg_protocol::SessionStatusEvent;

/// Source of OS session status transitions
#[async_trait]
pub trait SessionMonitor: Send {
    /// Next event, or `None` when the source is exhausted
    async fn recv(&mut self) -> Option<SessionStatusEvent>;
}

/// Push handle for feeding session status events into the host
#[derive(Clone)]
pub struct EventFeed {
    tx: mpsc::Sender<SessionStatusEvent>,
}

impl EventFeed {
    /// Push one event; drops it if the host is gone
    pub async fn push(&self, event: SessionStatusEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Session event dropped: monitor closed");
        }
    }
}

/// Channel-backed monitor implementation
pub struct ChannelMonitor {
    rx: mpsc::Receiver<SessionStatusEvent>,
}

#[async_trait]
impl SessionMonitor for ChannelMonitor {
    async fn recv(&mut self) -> Option<SessionStatusEvent> {
        self.rx.recv().await
    }
}

/// Create a connected feed/monitor pair
pub fn channel_monitor(capacity: usize) -> (EventFeed, ChannelMonitor) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventFeed { tx }, ChannelMonitor { rx })
}
