//! Session registry
//!
//! The registry owns every active session: its worker process, its channel,
//! and the set of attached connections. All mutations are serialized
//! through a single actor task; connection tasks and timers talk to it via
//! commands and never touch shared state directly.

mod actor;
mod session;
mod snapshot;

pub use actor::{spawn_registry, RegistryHandle};
pub use session::{Attachment, AttachmentId, SessionOutput, SessionState};
pub use snapshot::{SessionInfo, SessionSnapshot};
