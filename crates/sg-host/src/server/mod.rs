//! Network server: listener and per-connection handling

mod connection;
mod listener;

pub use listener::HostServer;
