//! Consumer ingress
//!
//! WebSocket side of the relay: accept the upgrade, demand a
//! `CLIENT,<code>` text message within the auth window, then split the
//! stream. The writer task owns the sink and emits binary frames from
//! the bridge, pong replies, and the final close frame; the read half
//! runs the control pump inline. Rejected and displaced consumers get
//! distinct close codes so peers can tell why they were dropped.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};
use crate::protocol::constants::{CLOSE_AUTH_TIMEOUT, CLOSE_BAD_AUTH, CLOSE_REPLACED};
use crate::protocol::handshake;
use crate::pump::{self, control::WriterSignal};
use crate::registry::{Attachment, Bridge, SessionCode, SessionRegistry};
use crate::server::config::RelayConfig;

/// Handle one consumer connection from accept to cleanup.
pub(crate) async fn handle(
    conn_id: u64,
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: RelayConfig,
    registry: Arc<SessionRegistry>,
) -> Result<()> {
    // One deadline covers the upgrade and the handshake message.
    let deadline = tokio::time::Instant::now() + config.client_auth_timeout;

    let upgrade = accept_async_with_config(socket, Some(ws_config(config.max_frame_len)));
    let mut ws = match tokio::time::timeout_at(deadline, upgrade).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::warn!(conn = conn_id, peer = %peer_addr, error = %e, "WebSocket upgrade failed");
            return Ok(());
        }
        Err(_) => {
            tracing::debug!(conn = conn_id, peer = %peer_addr, "WebSocket upgrade timed out");
            return Ok(());
        }
    };

    let remaining = deadline.duration_since(tokio::time::Instant::now());
    let code = match handshake::await_client_auth(&mut ws, remaining).await {
        Ok(code) => code,
        Err(e @ RelayError::AuthTimeout(_)) => {
            tracing::warn!(conn = conn_id, peer = %peer_addr, error = %e, "Consumer handshake failed");
            reject(&mut ws, CLOSE_AUTH_TIMEOUT, "auth timeout").await;
            return Ok(());
        }
        Err(e @ RelayError::BadAuth(_)) => {
            tracing::warn!(conn = conn_id, peer = %peer_addr, error = %e, "Consumer handshake failed");
            reject(&mut ws, CLOSE_BAD_AUTH, "bad auth").await;
            return Ok(());
        }
        Err(e) => {
            tracing::debug!(conn = conn_id, peer = %peer_addr, error = %e, "Consumer left during handshake");
            return Ok(());
        }
    };

    let (bridge, attachment, frame_rx) =
        attach_with_retry(&registry, &code, conn_id, config.frame_queue_depth).await;
    tracing::info!(
        session = %code,
        conn = conn_id,
        peer = %peer_addr,
        "Consumer authenticated"
    );
    if attachment.paired {
        tracing::info!(session = %code, conn = conn_id, "Session paired");
    }

    let (sink, mut messages) = ws.split();
    let (signal_tx, signal_rx) = mpsc::channel(8);
    let writer = tokio::spawn(write_frames(
        sink,
        frame_rx,
        signal_rx,
        attachment.token.clone(),
        Arc::clone(&bridge),
    ));

    let pump_result =
        pump::control::run(&bridge, &attachment.token, &mut messages, &signal_tx).await;

    let reason = match &pump_result {
        Ok(()) if attachment.token.is_cancelled() => {
            tracing::debug!(session = %code, conn = conn_id, "Consumer pump cancelled");
            "consumer cancelled"
        }
        Ok(()) => {
            tracing::info!(session = %code, conn = conn_id, "Consumer disconnected");
            "consumer disconnected"
        }
        Err(e) => {
            tracing::warn!(session = %code, conn = conn_id, error = %e, "Consumer stream error");
            "consumer error"
        }
    };

    cleanup(&registry, conn_id, reason).await;
    let _ = writer.await;
    Ok(())
}

/// Resolve the bridge for a code and attach to it, retrying when the
/// bridge tears down between lookup and attach.
async fn attach_with_retry(
    registry: &SessionRegistry,
    code: &SessionCode,
    conn_id: u64,
    queue_depth: usize,
) -> (Arc<Bridge>, Attachment, mpsc::Receiver<Vec<u8>>) {
    loop {
        let bridge = registry.get_or_create(code).await;
        let (frame_tx, frame_rx) = mpsc::channel(queue_depth);
        if let Ok(attachment) = bridge.attach_client(conn_id, frame_tx).await {
            return (bridge, attachment, frame_rx);
        }
    }
}

/// Tear down and unregister the session, but only if this connection
/// still belongs to it.
async fn cleanup(registry: &SessionRegistry, conn_id: u64, reason: &str) {
    if let Some((code, bridge)) = registry.find_by_connection(conn_id).await {
        bridge.teardown(reason).await;
        registry.remove_bridge(&code, &bridge).await;
    } else {
        tracing::debug!(conn = conn_id, "No session cleanup needed");
    }
}

/// Transport limits for one consumer socket.
///
/// Both message and frame caps sit above the relay maximum; a frame of
/// exactly `max_frame_len` bytes must pass the transport check.
fn ws_config(max_frame_len: u32) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_len as usize + 1024);
    config.max_frame_size = Some(max_frame_len as usize + 1024);
    config
}

/// Send a refusal close frame and finish the closing handshake.
async fn reject(ws: &mut WebSocketStream<TcpStream>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::Library(code),
        reason: Cow::Borrowed(reason),
    };
    let _ = ws.close(Some(frame)).await;
}

/// Pick the close frame for a consumer whose writer is exiting.
///
/// An attachment cancelled while the session is still alive means a new
/// consumer took the slot; everything else is an ordinary session end.
fn exit_close_frame(bridge: &Bridge, token: &CancellationToken) -> CloseFrame<'static> {
    if token.is_cancelled() && !bridge.is_closed() {
        CloseFrame {
            code: CloseCode::Library(CLOSE_REPLACED),
            reason: Cow::Borrowed("replaced by new consumer"),
        }
    } else {
        CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed("session closed"),
        }
    }
}

/// Drain bridge frames and pump signals onto the consumer's sink.
///
/// One binary message per frame, in channel order. Exits on attachment
/// cancellation or channel close and always finishes with a close frame
/// explaining why. A failed write cancels the attachment itself, which
/// stops the control pump and runs session cleanup.
async fn write_frames<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut frame_rx: mpsc::Receiver<Vec<u8>>,
    mut signal_rx: mpsc::Receiver<WriterSignal>,
    token: CancellationToken,
    bridge: Arc<Bridge>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut signals_open = true;
    let close_frame = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                break exit_close_frame(&bridge, &token);
            }
            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Binary(frame)).await {
                        tracing::debug!(error = %e, "Frame write failed");
                        token.cancel();
                        // The sink is dead, so this frame is best effort.
                        break CloseFrame {
                            code: CloseCode::Normal,
                            reason: Cow::Borrowed("session closed"),
                        };
                    }
                }
                None => break exit_close_frame(&bridge, &token),
            },
            signal = signal_rx.recv(), if signals_open => match signal {
                Some(WriterSignal::Pong(payload)) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                None => signals_open = false,
            },
        }
    };

    let _ = sink.send(Message::Close(Some(close_frame))).await;
    let _ = sink.close().await;
}
