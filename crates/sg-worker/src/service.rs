//! Session protocol services
//!
//! The desktop and file-transfer protocol terminations live behind
//! `SessionService`. The actual pixel/file semantics are device- and
//! platform-specific engines bound in at this seam; the implementations
//! here acknowledge traffic so the orchestration path is fully
//! exercisable.

use async_trait::async_trait;
use bytes::Bytes;

use sg_protocol::{SessionKind, SessionStatus};

/// Terminates the client protocol for one session kind
#[async_trait]
pub trait SessionService: Send {
    /// Handle one opaque protocol payload; optionally produce a reply
    async fn handle(&mut self, data: Bytes) -> anyhow::Result<Option<Bytes>>;

    /// React to an OS session status push from the host
    fn on_status(&mut self, status: SessionStatus);
}

/// Build the service for a session kind
pub fn service_for(kind: SessionKind) -> Box<dyn SessionService> {
    match kind {
        SessionKind::DesktopManage => Box::new(DesktopService { input: true }),
        SessionKind::DesktopView => Box::new(DesktopService { input: false }),
        SessionKind::FileTransfer => Box::new(FileTransferService),
    }
}

/// Desktop control/view termination.
///
/// The capture/injection engine attaches here; view-only sessions never
/// inject input regardless of what the client sends.
struct DesktopService {
    input: bool,
}

#[async_trait]
impl SessionService for DesktopService {
    async fn handle(&mut self, data: Bytes) -> anyhow::Result<Option<Bytes>> {
        if !self.input {
            tracing::trace!("Dropping {} input bytes on view-only session", data.len());
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn on_status(&mut self, status: SessionStatus) {
        match status {
            SessionStatus::Lock => tracing::info!("Desktop locked; capture paused"),
            SessionStatus::Unlock => tracing::info!("Desktop unlocked; capture resumed"),
            other => tracing::debug!("Session status: {}", other),
        }
    }
}

/// File-transfer termination
struct FileTransferService;

#[async_trait]
impl SessionService for FileTransferService {
    async fn handle(&mut self, data: Bytes) -> anyhow::Result<Option<Bytes>> {
        Ok(Some(data))
    }

    fn on_status(&mut self, status: SessionStatus) {
        tracing::debug!("Session status: {}", status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manage_acknowledges_payloads() {
        let mut service = service_for(SessionKind::DesktopManage);
        let reply = service.handle(Bytes::from_static(b"input")).await.unwrap();
        assert_eq!(reply.unwrap().as_ref(), b"input");
    }

    #[tokio::test]
    async fn test_view_only_drops_input() {
        let mut service = service_for(SessionKind::DesktopView);
        let reply = service.handle(Bytes::from_static(b"input")).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_file_transfer_acknowledges() {
        let mut service = service_for(SessionKind::FileTransfer);
        let reply = service.handle(Bytes::from_static(b"chunk")).await.unwrap();
        assert_eq!(reply.unwrap().as_ref(), b"chunk");
    }
}
