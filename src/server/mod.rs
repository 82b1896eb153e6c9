//! Relay server frontend
//!
//! Two listeners share one [`SessionRegistry`](crate::registry::SessionRegistry):
//! a raw TCP port for producers and a WebSocket port for consumers. The
//! listener accepts sockets and spawns one handler task per connection;
//! [`host`] and [`client`] own the per-connection protocol from
//! handshake to cleanup.

pub mod config;
pub mod listener;

pub(crate) mod client;
pub(crate) mod host;

pub use config::RelayConfig;
pub use listener::RelayServer;
