//! Producer-to-consumer video pump

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::framing;
use crate::registry::Bridge;

/// Pump length-prefixed frames from the producer's read half into the
/// bridge, one binary message per frame, in arrival order.
///
/// Every await races the attachment token, so a displaced or torn-down
/// producer stops within one scheduling step even while blocked waiting
/// for a consumer. Cancellation is a clean exit; stream end, short
/// reads, and length violations come back as errors for the caller to
/// turn into a teardown.
pub async fn run<R>(
    bridge: &Bridge,
    token: &CancellationToken,
    reader: &mut R,
    max_frame_len: u32,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            frame = framing::read_frame(reader, max_frame_len) => frame?,
        };

        let len = frame.len();
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            res = bridge.forward_frame(frame) => res?,
        }
        tracing::trace!(session = %bridge.code(), len, "frame forwarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::protocol::framing::encode_frame_header;
    use crate::registry::SessionCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn wire_frame(payload: &[u8]) -> Vec<u8> {
        let mut wire = encode_frame_header(payload.len() as u32).to_vec();
        wire.extend_from_slice(payload);
        wire
    }

    #[tokio::test]
    async fn test_frames_forwarded_in_order() {
        let bridge = Bridge::new(SessionCode::new("test"));
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        bridge.attach_client(1, frame_tx).await.unwrap();

        let mut wire = wire_frame(b"first");
        wire.extend_from_slice(&wire_frame(b"second"));
        let mut mock = tokio_test::io::Builder::new().read(&wire).build();

        let token = CancellationToken::new();
        let err = run(&bridge, &token, &mut mock, 1024).await.unwrap_err();
        // Script exhausted on a frame boundary.
        assert!(matches!(err, RelayError::ConnectionClosed));

        assert_eq!(frame_rx.recv().await.unwrap(), b"first");
        assert_eq!(frame_rx.recv().await.unwrap(), b"second");
        assert_eq!(bridge.stats().frames_forwarded, 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_stops_pump() {
        let bridge = Bridge::new(SessionCode::new("test"));
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        bridge.attach_client(1, frame_tx).await.unwrap();

        let mut mock = tokio_test::io::Builder::new()
            .read(&encode_frame_header(9))
            .build();

        let token = CancellationToken::new();
        let err = run(&bridge, &token, &mut mock, 8).await.unwrap_err();
        assert!(matches!(err, RelayError::FrameLength { len: 9, max: 8 }));
    }

    #[tokio::test]
    async fn test_cancel_exits_cleanly() {
        let bridge = Arc::new(Bridge::new(SessionCode::new("test")));
        let (_write_half, mut read_half) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let pump = {
            let bridge = Arc::clone(&bridge);
            let token = token.clone();
            tokio::spawn(async move { run(&bridge, &token, &mut read_half, 1024).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_consumer() {
        // No consumer attached, so the pump blocks inside the bridge.
        let bridge = Arc::new(Bridge::new(SessionCode::new("test")));
        let wire = wire_frame(b"frame");
        let token = CancellationToken::new();

        let pump = {
            let bridge = Arc::clone(&bridge);
            let token = token.clone();
            tokio::spawn(async move {
                let mut mock = tokio_test::io::Builder::new().read(&wire).build();
                run(&bridge, &token, &mut mock, 1024).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pump.is_finished());
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
