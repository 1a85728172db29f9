//! sg-protocol: Wire and channel framing for Spyglass
//!
//! Defines the length-prefixed frame format shared by the network boundary
//! (remote client to host) and the session channel (host to worker), the
//! message enums carried inside frames, and the identifier types that name
//! OS sessions and session kinds.

pub mod codec;
pub mod error;
pub mod frame;
pub mod ids;
pub mod message;

pub use codec::{FrameCodec, MessageCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use ids::{
    CloseReason, OsSessionId, SessionKey, SessionKind, SessionStatus, SessionStatusEvent,
};
pub use message::{ChannelMessage, Message};
