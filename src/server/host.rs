//! Producer ingress
//!
//! One task per accepted connection on the producer port: authenticate,
//! attach to the session bridge, then pump video frames inline until the
//! connection or the session ends. The write half moves into a separate
//! task that drains control lines from the bridge channel, so each half
//! of the socket has exactly one owner.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};
use crate::protocol::handshake;
use crate::pump;
use crate::registry::{Attachment, Bridge, SessionCode, SessionRegistry};
use crate::server::config::RelayConfig;

/// Handle one producer connection from accept to cleanup.
pub(crate) async fn handle(
    conn_id: u64,
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    config: RelayConfig,
    registry: Arc<SessionRegistry>,
) -> Result<()> {
    let (code, leftover) = match handshake::read_host_auth(
        &mut socket,
        config.host_line_timeout,
        config.host_fallback_timeout,
    )
    .await
    {
        Ok(auth) => auth,
        Err(e) => {
            tracing::warn!(
                conn = conn_id,
                peer = %peer_addr,
                error = %e,
                "Producer handshake failed"
            );
            return Ok(());
        }
    };

    let (bridge, attachment, control_rx) =
        attach_with_retry(&registry, &code, conn_id, config.control_queue_depth).await;
    tracing::info!(
        session = %code,
        conn = conn_id,
        peer = %peer_addr,
        "Producer authenticated"
    );
    if attachment.paired {
        tracing::info!(session = %code, conn = conn_id, "Session paired");
    }

    let (read_half, write_half) = socket.into_split();
    let writer = tokio::spawn(write_control_lines(
        write_half,
        control_rx,
        attachment.token.clone(),
    ));

    // Hand any bytes that rode in behind the handshake to the pump
    // ahead of the socket.
    let mut reader = std::io::Cursor::new(leftover).chain(read_half);
    let pump_result =
        pump::video::run(&bridge, &attachment.token, &mut reader, config.max_frame_len).await;

    let reason = match &pump_result {
        Ok(()) => {
            // Attachment token fired: displaced or already torn down.
            tracing::debug!(session = %code, conn = conn_id, "Producer pump cancelled");
            "producer cancelled"
        }
        Err(RelayError::ConnectionClosed) => {
            tracing::info!(session = %code, conn = conn_id, "Producer disconnected");
            "producer disconnected"
        }
        Err(e) => {
            tracing::warn!(session = %code, conn = conn_id, error = %e, "Producer stream error");
            "producer error"
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
) -> (Arc<Bridge>, Attachment, mpsc::Receiver<String>) {
    loop {
        let bridge = registry.get_or_create(code).await;
        let (control_tx, control_rx) = mpsc::channel(queue_depth);
        if let Ok(attachment) = bridge.attach_host(conn_id, control_tx).await {
            return (bridge, attachment, control_rx);
        }
        // Lost a race with teardown; the next lookup mints a fresh bridge.
    }
}

/// Tear down and unregister the session, but only if this connection
/// still belongs to it. A displaced connection finds nothing here and
/// leaves its successor's session alone.
async fn cleanup(registry: &SessionRegistry, conn_id: u64, reason: &str) {
    if let Some((code, bridge)) = registry.find_by_connection(conn_id).await {
        bridge.teardown(reason).await;
        registry.remove_bridge(&code, &bridge).await;
    } else {
        tracing::debug!(conn = conn_id, "No session cleanup needed");
    }
}

/// Drain control lines onto the producer's write half.
///
/// Exits when the attachment is cancelled or the channel closes, then
/// shuts the write half down so the producer sees a clean close. A
/// failed write also cancels the attachment: the pump side observes the
/// cancellation and runs session cleanup.
async fn write_control_lines<W>(
    mut writer: W,
    mut control_rx: mpsc::Receiver<String>,
    token: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            line = control_rx.recv() => match line {
                Some(line) => {
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        tracing::debug!(error = %e, "Control write failed");
                        token.cancel();
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = writer.shutdown().await;
}
