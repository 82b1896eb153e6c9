//! Authentication handshakes for both relay endpoints
//!
//! Producers open with a `HOST,<code>` line over raw TCP; consumers open
//! with a `CLIENT,<code>` text message over the WebSocket. Producer
//! handshakes are messy in the wild: some send `HOST, <code>` with a space
//! and no trailing newline, and video bytes can ride in the same burst as
//! the line. The reader here copes with all of that and hands any
//! over-read bytes back to the caller for the video pump.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{RelayError, Result};
use crate::protocol::constants::{CLIENT_AUTH_PREFIX, HOST_AUTH_PREFIX, MAX_AUTH_LINE};
use crate::registry::SessionCode;

/// Parse a producer handshake from raw bytes.
///
/// Trailing `\r`/`\n` are stripped and the code is trimmed of surrounding
/// whitespace, so `HOST, abc123` and `HOST,abc123\n` both yield `abc123`.
pub fn parse_host_line(raw: &[u8]) -> Result<SessionCode> {
    let text =
        std::str::from_utf8(raw).map_err(|_| RelayError::BadAuth("handshake is not utf-8"))?;
    let line = text.trim_end_matches(|c| c == '\r' || c == '\n');
    let rest = line
        .strip_prefix(HOST_AUTH_PREFIX)
        .ok_or(RelayError::BadAuth("expected HOST,<code>"))?;
    let code = rest.trim();
    if code.is_empty() {
        return Err(RelayError::BadAuth("empty session code"));
    }
    Ok(SessionCode::new(code))
}

/// Parse the first consumer message.
///
/// Only a text `CLIENT,<code>` authenticates. A binary message, a ping,
/// or an early close is a handshake failure, never treated as data.
pub fn parse_client_message(msg: &Message) -> Result<SessionCode> {
    let text = match msg {
        Message::Text(text) => text,
        _ => return Err(RelayError::BadAuth("handshake must be a text message")),
    };
    let line = text.trim_end_matches(|c| c == '\r' || c == '\n');
    let rest = line
        .strip_prefix(CLIENT_AUTH_PREFIX)
        .ok_or(RelayError::BadAuth("expected CLIENT,<code>"))?;
    let code = rest.trim();
    if code.is_empty() {
        return Err(RelayError::BadAuth("empty session code"));
    }
    Ok(SessionCode::new(code))
}

/// Read the producer handshake from a fresh TCP stream.
///
/// The first `line_timeout` accepts only a newline-terminated line: a
/// burst with no delimiter could still be a line cut mid-code, so the
/// reader keeps waiting. Once the line window expires, the remaining
/// `fallback_timeout` treats the bytes accumulated so far as the whole
/// handshake and accepts as soon as they parse, which is how producers
/// that never send a delimiter get in. Returns the session code plus
/// any bytes that arrived after the newline, which belong to the video
/// stream and must not be lost.
pub async fn read_host_auth<R>(
    reader: &mut R,
    line_timeout: Duration,
    fallback_timeout: Duration,
) -> Result<(SessionCode, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(MAX_AUTH_LINE);

    match timeout(line_timeout, collect_auth(reader, &mut buf, false)).await {
        Ok(outcome) => outcome,
        Err(_) => match timeout(fallback_timeout, collect_auth(reader, &mut buf, true)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if buf.is_empty() {
                    Err(RelayError::AuthTimeout(line_timeout + fallback_timeout))
                } else {
                    parse_host_line(&buf).map(|code| (code, Bytes::new()))
                }
            }
        },
    }
}

/// Accumulate handshake bytes until they resolve one way or the other.
///
/// The buffer lives in the caller so a timeout does not throw away a
/// partial handshake. With `raw` set, a buffer with no delimiter counts
/// as complete the moment it parses; the pending buffer is checked
/// before the first read so the fallback window picks up a handshake
/// that was already sitting there when the line window ran out.
async fn collect_auth<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    raw: bool,
) -> Result<(SessionCode, Bytes)>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            if pos >= MAX_AUTH_LINE {
                return Err(RelayError::BadAuth("handshake line too long"));
            }
            let line = buf.split_to(pos + 1);
            let code = parse_host_line(&line)?;
            // Anything past the newline is video data that rode along
            // in the same burst.
            return Ok((code, buf.split().freeze()));
        }

        // Cap applies to both dialects. Checking it ahead of the raw
        // parse keeps an over-long burst from authenticating as a
        // truncated code once the buffer fills.
        if buf.len() >= MAX_AUTH_LINE {
            return Err(RelayError::BadAuth("handshake line too long"));
        }

        if raw && !buf.is_empty() {
            if let Ok(code) = parse_host_line(buf) {
                buf.clear();
                return Ok((code, Bytes::new()));
            }
        }

        let n = reader.read_buf(buf).await?;
        if n == 0 {
            // Peer went away. Parse whatever arrived so the log says
            // why, then fail.
            if buf.is_empty() {
                return Err(RelayError::ConnectionClosed);
            }
            let code = parse_host_line(buf)?;
            return Ok((code, Bytes::new()));
        }
    }
}

/// Wait for the first consumer message and parse it as the handshake.
pub async fn await_client_auth<S>(stream: &mut S, window: Duration) -> Result<SessionCode>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    match timeout(window, stream.next()).await {
        Ok(Some(Ok(msg))) => parse_client_message(&msg),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(None) => Err(RelayError::ConnectionClosed),
        Err(_) => Err(RelayError::AuthTimeout(window)),
    }
}
