//! Rendezvous relay for screen-sharing sessions.
//!
//! A producer (the machine being viewed) dials a raw TCP port and
//! authenticates with a `HOST,<code>` line; a consumer (the viewer)
//! dials a WebSocket port and authenticates with a `CLIENT,<code>`
//! text message. Matching codes are bridged: length-prefixed video
//! frames flow producer to consumer as binary WebSocket messages, and
//! consumer text lines flow back to the producer as newline-terminated
//! control commands.
//!
//! ## Wire format
//!
//! Producer side, after the auth line:
//!
//! ```text
//! [u32 length, big endian][payload bytes]
//! ```
//!
//! Lengths of zero or above 64 MiB are rejected and the producer is
//! disconnected. Consumer side is plain WebSocket: one binary message
//! per video frame, text messages for control lines.
//!
//! ## Quick start
//!
//! ```no_run
//! use screenrelay::{RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> screenrelay::Result<()> {
//!     let server = RelayServer::bind(RelayConfig::from_env()?).await?;
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod pump;
pub mod registry;
pub mod server;

pub use error::{RelayError, Result};
pub use registry::{Bridge, BridgePhase, BridgeStats, SessionCode, SessionRegistry};
pub use server::{RelayConfig, RelayServer};
