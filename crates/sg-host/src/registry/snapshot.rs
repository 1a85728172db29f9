//! Read-only registry snapshot for monitoring consumers
//!
//! The actor is the only writer; the status endpoint and anything else
//! that wants a view reads without touching registry state.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use sg_protocol::SessionKey;

/// Snapshot row for one active session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Target OS session ID
    pub os_session: u32,
    /// Session kind name
    pub kind: String,
    /// Username that created the session
    pub owner: String,
    /// Lifecycle state name
    pub state: String,
    /// Worker process ID, once known
    pub pid: Option<u32>,
    /// Number of attached connections
    pub clients: usize,
}

/// Shared read-only mirror of the session table
#[derive(Clone, Default)]
pub struct SessionSnapshot {
    inner: Arc<DashMap<SessionKey, SessionInfo>>,
}

impl SessionSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or insert a row (actor only)
    pub(crate) fn upsert(&self, key: SessionKey, info: SessionInfo) {
        self.inner.insert(key, info);
    }

    /// Remove a row (actor only)
    pub(crate) fn remove(&self, key: &SessionKey) {
        self.inner.remove(key);
    }

    /// Look up one session
    pub fn get(&self, key: &SessionKey) -> Option<SessionInfo> {
        self.inner.get(key).map(|r| r.clone())
    }

    /// List all sessions, ordered by (OS session, kind)
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut rows: Vec<SessionInfo> = self.inner.iter().map(|r| r.clone()).collect();
        rows.sort_by(|a, b| (a.os_session, &a.kind).cmp(&(b.os_session, &b.kind)));
        rows
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if no sessions are active
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
