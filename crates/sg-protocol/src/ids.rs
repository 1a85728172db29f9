//! Identifier and status types shared across the host and workers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an interactive OS session (logon session / desktop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OsSessionId(pub u32);

impl OsSessionId {
    /// Create a new OS session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The console session on most platforms
    pub const CONSOLE: OsSessionId = OsSessionId(0);
}

impl fmt::Display for OsSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os-session-{}", self.0)
    }
}

impl From<u32> for OsSessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Kind of remote-access session a client can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Full desktop control (view + input)
    DesktopManage,
    /// View-only desktop access
    DesktopView,
    /// File transfer
    FileTransfer,
}

impl SessionKind {
    /// Stable string name, used on the worker command line
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::DesktopManage => "desktop-manage",
            SessionKind::DesktopView => "desktop-view",
            SessionKind::FileTransfer => "file-transfer",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop-manage" => Ok(SessionKind::DesktopManage),
            "desktop-view" => Ok(SessionKind::DesktopView),
            "file-transfer" => Ok(SessionKind::FileTransfer),
            other => Err(format!("unknown session kind: {}", other)),
        }
    }
}

/// Registry key for a session: one live worker per (OS session, kind) pair.
///
/// Desktop and file-transfer sessions to the same desktop are independent
/// workers; concurrent clients of the same kind share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Target interactive OS session
    pub os_session: OsSessionId,
    /// Session kind
    pub kind: SessionKind,
}

impl SessionKey {
    /// Create a new session key
    pub fn new(os_session: OsSessionId, kind: SessionKind) -> Self {
        Self { os_session, kind }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os_session, self.kind)
    }
}

/// OS session status transition reported by the session monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A user logged on to the session
    Logon,
    /// The user logged off
    Logoff,
    /// The session was locked
    Lock,
    /// The session was unlocked
    Unlock,
    /// A remote-desktop client connected to the session
    RemoteConnect,
    /// The remote-desktop client disconnected
    RemoteDisconnect,
}

impl SessionStatus {
    /// Whether this status ends the interactive session for our purposes
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Logoff | SessionStatus::RemoteDisconnect)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Logon => write!(f, "logon"),
            SessionStatus::Logoff => write!(f, "logoff"),
            SessionStatus::Lock => write!(f, "lock"),
            SessionStatus::Unlock => write!(f, "unlock"),
            SessionStatus::RemoteConnect => write!(f, "remote-connect"),
            SessionStatus::RemoteDisconnect => write!(f, "remote-disconnect"),
        }
    }
}

/// Status transition event for one OS session, consumed once by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusEvent {
    /// The OS session the transition applies to
    pub os_session: OsSessionId,
    /// The transition
    pub status: SessionStatus,
}

/// Reason code sent to a client when its connection is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Authentication handshake failed
    AuthenticationFailed,
    /// The authenticated user is not entitled to the requested session kind
    NotAuthorized,
    /// The worker process failed to start or signal readiness
    SpawnFailed,
    /// The channel to the worker broke
    ChannelFailed,
    /// The session was terminated (OS logoff/disconnect, drain expiry)
    SessionTerminated,
    /// The host is shutting down
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::AuthenticationFailed => write!(f, "authentication failed"),
            CloseReason::NotAuthorized => write!(f, "not authorized"),
            CloseReason::SpawnFailed => write!(f, "worker spawn failed"),
            CloseReason::ChannelFailed => write!(f, "worker channel failed"),
            CloseReason::SessionTerminated => write!(f, "session terminated"),
            CloseReason::ServerShutdown => write!(f, "server shutting down"),
        }
    }
}
