//! Message types for the Spyglass protocol
//!
//! Two message sets share the frame format:
//!
//! - [`Message`] travels between a remote client and the host. The first
//!   four variants implement the password-proof handshake and are the only
//!   messages sent in the clear; everything after `Confirm` is sealed with
//!   the traffic keys before framing.
//! - [`ChannelMessage`] travels over the session channel between the host
//!   and a worker process. The channel is local IPC and is not sealed.
//!
//! # Message Flow
//!
//! Typical sequence for a session:
//!
//! 1. Client connects and sends `Hello`
//! 2. Host responds with `Challenge` (salt + server public ephemeral)
//! 3. Client sends `Proof`, host verifies and replies `Confirm`
//! 4. Client sends `SessionRequest` (sealed), host attaches it to a worker
//!    and replies `SessionAccepted`
//! 5. `Data` frames flow bidirectionally until either side sends `Close`

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{CloseReason, OsSessionId, SessionKind, SessionStatus};

/// Messages exchanged between a remote client and the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Handshake opener: the client identifies itself by username.
    /// The password itself never crosses the wire.
    Hello {
        /// Account name to authenticate as
        username: String,
    },

    /// Host reply: verifier salt and the server's public ephemeral value
    Challenge {
        /// Salt from the credential record
        salt: Vec<u8>,
        /// Server public ephemeral (B)
        server_public: Vec<u8>,
    },

    /// Client proof of password possession
    Proof {
        /// Client public ephemeral (A)
        client_public: Vec<u8>,
        /// Keyed evidence (M1)
        evidence: Vec<u8>,
    },

    /// Host counter-proof, completing the handshake
    Confirm {
        /// Keyed evidence (M2)
        evidence: Vec<u8>,
    },

    /// Proof rejected; the client may restart from `Hello` while attempts
    /// remain on this connection
    Denied {
        /// Handshake attempts left before the connection is closed
        attempts_left: u32,
    },

    /// First sealed application message: which session the client wants
    SessionRequest {
        /// Session kind to open
        kind: SessionKind,
        /// Target interactive OS session
        os_session: OsSessionId,
    },

    /// The session is attached and forwarding has begun
    SessionAccepted,

    /// The session request was refused
    SessionRefused {
        /// Why
        reason: CloseReason,
    },

    /// Opaque application payload, forwarded verbatim to/from the worker
    Data(Bytes),

    /// Connection close with a reason code.
    /// Sent by the host before dropping the transport.
    Close {
        /// Why
        reason: CloseReason,
    },
}

/// Messages exchanged between the host and a session worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChannelMessage {
    /// Worker startup acknowledgment, sent within the spawn window
    Ready {
        /// Worker process ID
        pid: u32,
    },

    /// Opaque client protocol payload, in either direction
    Data(Bytes),

    /// OS session status pushed to the worker (lock/unlock etc.)
    Status(SessionStatus),

    /// Ask the worker to exit cleanly
    Terminate,

    /// Worker is about to exit
    Exited {
        /// Exit code if the protocol termination ended normally
        code: Option<i32>,
    },
}
