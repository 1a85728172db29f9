//! sg-worker: One isolated session worker
//!
//! Spawned by the host with its channel on stdio, one process per active
//! session, running under the target interactive user's context. Sends
//! `Ready` on startup, services protocol payloads until the host asks it
//! to terminate, and holds no state across restarts.

pub mod run;
pub mod service;

pub use run::run_session;
pub use service::{service_for, SessionService};
