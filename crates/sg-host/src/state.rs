//! Shared host state

use sg_core::users::UserStore;
use sg_core::HostConfig;

use crate::registry::SessionSnapshot;

/// State shared by the listener, connection tasks and the status endpoint
pub struct HostState {
    /// Configuration
    pub config: HostConfig,
    /// Credential store, read-only after load
    pub users: UserStore,
    /// Read-only session table mirror
    pub snapshot: SessionSnapshot,
}

impl HostState {
    /// Create host state around a loaded credential store
    pub fn new(config: HostConfig, users: UserStore) -> Self {
        Self {
            config,
            users,
            snapshot: SessionSnapshot::new(),
        }
    }
}
