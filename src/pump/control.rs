//! Consumer-to-producer control pump

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::framing;
use crate::registry::Bridge;

/// Out-of-band requests from the pump to the consumer's writer task.
///
/// The pump owns only the read half of the WebSocket; anything that must
/// be written goes through the writer task.
#[derive(Debug)]
pub enum WriterSignal {
    /// Pong reply carrying the ping payload.
    Pong(Vec<u8>),
}

/// Pump consumer messages into the bridge until the consumer goes away.
///
/// The message kind decides everything, exactly once, at this boundary:
/// text becomes a newline-terminated control line for the producer,
/// binary after auth is dropped, pings are answered via the writer. A
/// close message or the end of the stream is a clean exit; the caller
/// tears the session down either way, because a session without its
/// consumer is done.
pub async fn run<S>(
    bridge: &Bridge,
    token: &CancellationToken,
    stream: &mut S,
    signal_tx: &mpsc::Sender<WriterSignal>,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                let line = framing::normalize_control_line(&text);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    res = bridge.forward_control(line) => res?,
                }
                tracing::trace!(session = %bridge.code(), "control line forwarded");
            }
            Some(Ok(Message::Binary(payload))) => {
                // Not part of the protocol once authenticated; ignore.
                tracing::debug!(
                    session = %bridge.code(),
                    len = payload.len(),
                    "dropping binary message from consumer"
                );
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = signal_tx.send(WriterSignal::Pong(payload)).await;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
