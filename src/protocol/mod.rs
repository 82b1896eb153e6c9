//! Wire protocol for both sides of the relay
//!
//! Two transports meet here and they speak different dialects:
//!
//! ```text
//!  producer (raw TCP)                      consumer (WebSocket)
//!  ──────────────────                      ────────────────────
//!  HOST,<code>\n                           text  "CLIENT,<code>"
//!  [u32 len BE][payload]  ── frames ──►    binary message per frame
//!  <control line>\n       ◄─ control ──    text  "mouse_move,10,20"
//! ```
//!
//! The producer side is a bare length-prefixed stream, so framing is
//! explicit ([`framing`]). The consumer side rides on WebSocket message
//! boundaries, so the only protocol work is the handshake and the
//! text/binary split, decided once per message at the transport edge.

pub mod constants;
pub mod framing;
pub mod handshake;
