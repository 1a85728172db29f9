//! Core error types for Spyglass

use sg_protocol::{ProtocolError, SessionKind};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the Spyglass host
#[derive(Error, Debug)]
pub enum HostError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Worker spawn error
    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    /// Session channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Traffic sealing error
    #[error("Secure transport error: {0}")]
    Secure(#[from] SecureError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication and authorization failures.
///
/// Every variant closes the connection; nothing here is retried within a
/// connection. Entitlement refusal is deliberately distinct from spawn
/// failure so clients can tell policy from breakage.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A handshake message arrived out of order or with bad contents
    #[error("Malformed handshake (state: {state})")]
    MalformedHandshake { state: &'static str },

    /// The client's proof did not verify
    #[error("Proof verification failed")]
    BadProof,

    /// The per-connection attempt ceiling was exceeded
    #[error("Too many failed attempts")]
    AttemptsExceeded,

    /// The peer sent a degenerate ephemeral value (A or B divisible by N)
    #[error("Illegal ephemeral value")]
    IllegalEphemeral,

    /// The handshake did not complete within the configured window
    #[error("Handshake timed out")]
    Timeout,

    /// The authenticated user may not open this session kind
    #[error("User not entitled to {kind} sessions")]
    NotEntitled { kind: SessionKind },
}

/// Worker spawn failures
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The worker process could not be started
    #[error("Failed to start worker: {0}")]
    Start(std::io::Error),

    /// The worker started but never signaled readiness
    #[error("Worker did not signal readiness within {timeout_secs}s")]
    ReadinessTimeout { timeout_secs: u64 },

    /// The worker exited before signaling readiness
    #[error("Worker exited during startup")]
    EarlyExit,

    /// The configured session cap was reached
    #[error("Session limit reached")]
    LimitReached,
}

/// Session channel failures. Always terminal for the session.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The peer process exited or the pipe broke
    #[error("Channel broken: {0}")]
    Broken(String),

    /// The channel was closed locally
    #[error("Channel closed")]
    Closed,

    /// Framing/decoding failure on the channel
    #[error("Channel protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Traffic sealing/opening failures
#[derive(Error, Debug)]
pub enum SecureError {
    /// The frame is too short to contain a tag
    #[error("Sealed frame too short")]
    TooShort,

    /// Tag verification failed
    #[error("Message authentication failed")]
    BadTag,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
