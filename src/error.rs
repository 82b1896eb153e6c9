//! Error types for the relay
//!
//! Every failure is handled by the connection task that observed it: log,
//! tear down the owning session, exit. Errors never cross session
//! boundaries and the relay never retries on behalf of a peer.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

/// All the ways a relay connection can fail.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Handshake arrived but did not match the expected form.
    #[error("bad handshake: {0}")]
    BadAuth(&'static str),

    /// Handshake did not arrive within the allowed window.
    #[error("handshake timed out after {0:?}")]
    AuthTimeout(Duration),

    /// Frame length prefix outside the accepted range.
    #[error("frame length {len} outside 1..={max}")]
    FrameLength { len: u32, max: u32 },

    /// Stream ended in the middle of a frame.
    #[error("stream closed mid-frame, {expected} bytes still expected")]
    ShortRead { expected: usize },

    /// Transport ended where a message was still required.
    #[error("connection closed")]
    ConnectionClosed,

    /// The session was already torn down.
    #[error("session is shut down")]
    SessionClosed,

    /// Underlying socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    /// Invalid environment configuration.
    #[error("invalid {var}: {reason}")]
    Config { var: &'static str, reason: String },
}

impl RelayError {
    /// True for handshake failures, which get reported to the peer before
    /// the connection is dropped.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RelayError::BadAuth(_) | RelayError::AuthTimeout(_))
    }
}
