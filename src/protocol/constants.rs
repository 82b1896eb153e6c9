//! Wire-level constants shared by both relay endpoints

/// Size of the length prefix in front of every video frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest accepted frame payload, inclusive (64 MiB).
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Upper bound on a handshake line, delimiter included.
pub const MAX_AUTH_LINE: usize = 256;

/// Prefix of the producer handshake line.
pub const HOST_AUTH_PREFIX: &str = "HOST,";

/// Prefix of the consumer handshake message.
pub const CLIENT_AUTH_PREFIX: &str = "CLIENT,";

/// Close code sent when a consumer fails to authenticate in time.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4000;

/// Close code sent when a consumer handshake is malformed.
pub const CLOSE_BAD_AUTH: u16 = 4001;

/// Close code sent when a newer consumer takes over the session.
pub const CLOSE_REPLACED: u16 = 4002;

/// Default listening port for producers (raw TCP).
pub const DEFAULT_HOST_PORT: u16 = 50000;

/// Default listening port for consumers (WebSocket).
pub const DEFAULT_CLIENT_PORT: u16 = 50001;
