//! Session registry and bridges
//!
//! The registry pairs one producer with one consumer per session code
//! and routes traffic between them in both directions.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<SessionRegistry>
//!                  ┌──────────────────────────┐
//!                  │ sessions: HashMap<Code,  │
//!                  │   Arc<Bridge> {          │
//!                  │     host:   control_tx,  │
//!                  │     client: frame_tx,    │
//!                  │     shutdown token,      │
//!                  │   }                      │
//!                  │ >                        │
//!                  └────────────┬─────────────┘
//!                               │
//!              ┌────────────────┴────────────────┐
//!              │                                 │
//!              ▼                                 ▼
//!        [Producer task]                   [Consumer task]
//!        read_frame() ──► forward_frame() ──► frame_tx ──► WS binary
//!        TCP line ◄── control_tx ◄── forward_control() ◄── WS text
//! ```
//!
//! # Swap-safe forwarding
//!
//! Bridge slots hold mpsc senders, not sockets. Forwarders snapshot the
//! current sender per message, so replacing an endpoint mid-session
//! redirects the very next message to the successor while the other side
//! never notices.

pub mod bridge;
pub mod store;

pub use bridge::{Attachment, Bridge, BridgePhase, BridgeStats, SessionCode};
pub use store::SessionRegistry;
