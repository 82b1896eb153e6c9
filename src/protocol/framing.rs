//! Length-prefixed frame codec and control-line normalization
//!
//! Producer video travels as `[4-byte big-endian length][payload]`. The
//! codec owns no sockets; readers are borrowed per call so the ingress
//! tasks keep ownership of their halves.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};
use crate::protocol::constants::FRAME_HEADER_LEN;

/// Encode a frame length as the 4-byte big-endian header.
pub fn encode_frame_header(len: u32) -> [u8; FRAME_HEADER_LEN] {
    len.to_be_bytes()
}

/// Decode a 4-byte big-endian length header.
///
/// Range validation is a separate step, see [`check_frame_len`].
pub fn decode_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Validate a decoded frame length against the configured maximum.
///
/// Zero-length and oversized frames are protocol violations. Exactly
/// `max` is accepted.
pub fn check_frame_len(len: u32, max: u32) -> Result<usize> {
    if len == 0 || len > max {
        return Err(RelayError::FrameLength { len, max });
    }
    Ok(len as usize)
}

/// Fill `buf` completely, looping over however many short reads the
/// source needs. EOF before the buffer is full reports the missing byte
/// count instead of silently truncating.
pub async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(RelayError::ShortRead {
                expected: buf.len() - filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Read one complete frame: header, length validation, then payload.
///
/// The length is validated before a single payload byte is read, so an
/// oversized prefix never commits the relay to a 4 GiB allocation. EOF
/// on a frame boundary comes back as [`RelayError::ConnectionClosed`];
/// EOF anywhere else is a short read.
pub async fn read_frame<R>(reader: &mut R, max: u32) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match read_exact(reader, &mut header).await {
        Ok(()) => {}
        Err(RelayError::ShortRead { expected }) if expected == FRAME_HEADER_LEN => {
            // Orderly end of stream between frames.
            return Err(RelayError::ConnectionClosed);
        }
        Err(e) => return Err(e),
    }

    let len = check_frame_len(decode_frame_header(&header), max)?;
    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload).await?;
    Ok(payload)
}

/// Strip every trailing `\r` and `\n` from a control line and append
/// exactly one `\n`. Interior bytes pass through untouched.
pub fn normalize_control_line(line: &str) -> String {
    let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n');
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push_str(trimmed);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::MAX_FRAME_LEN;

    #[test]
    fn test_header_roundtrip() {
        for len in [1u32, 255, 1000, MAX_FRAME_LEN, u32::MAX] {
            let header = encode_frame_header(len);
            assert_eq!(decode_frame_header(&header), len);
        }
        assert_eq!(encode_frame_header(1), [0, 0, 0, 1]);
        assert_eq!(encode_frame_header(0x0102_0304), [1, 2, 3, 4]);
    }

    #[test]
    fn test_check_frame_len_bounds() {
        assert!(matches!(
            check_frame_len(0, MAX_FRAME_LEN),
            Err(RelayError::FrameLength { len: 0, .. })
        ));
        assert_eq!(check_frame_len(1, MAX_FRAME_LEN).unwrap(), 1);
        assert_eq!(
            check_frame_len(MAX_FRAME_LEN, MAX_FRAME_LEN).unwrap(),
            MAX_FRAME_LEN as usize
        );
        assert!(matches!(
            check_frame_len(MAX_FRAME_LEN + 1, MAX_FRAME_LEN),
            Err(RelayError::FrameLength { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_complete() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame_header(5));
        wire.extend_from_slice(b"hello");
        let mut mock = tokio_test::io::Builder::new().read(&wire).build();

        let frame = read_frame(&mut mock, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn test_read_frame_across_short_reads() {
        // Header and payload arrive fragmented across four reads.
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 6])
            .read(b"abc")
            .read(b"def")
            .build();

        let frame = read_frame(&mut mock, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(frame, b"abcdef");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_zero_length() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&encode_frame_header(0))
            .build();

        let err = read_frame(&mut mock, MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, RelayError::FrameLength { len: 0, .. }));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_before_payload() {
        // Only the header is scripted. The call must fail without
        // attempting to read payload bytes.
        let mut mock = tokio_test::io::Builder::new()
            .read(&encode_frame_header(MAX_FRAME_LEN + 1))
            .build();

        let err = read_frame(&mut mock, MAX_FRAME_LEN).await.unwrap_err();
        match err {
            RelayError::FrameLength { len, max } => {
                assert_eq!(len, MAX_FRAME_LEN + 1);
                assert_eq!(max, MAX_FRAME_LEN);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_frame_eof_on_boundary() {
        let mut mock = tokio_test::io::Builder::new().build();

        let err = read_frame(&mut mock, MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, RelayError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&encode_frame_header(10))
            .read(b"abcd")
            .build();

        let err = read_frame(&mut mock, MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, RelayError::ShortRead { expected: 6 }));
    }

    #[test]
    fn test_normalize_control_line() {
        assert_eq!(normalize_control_line("mouse_move,10,20"), "mouse_move,10,20\n");
        assert_eq!(normalize_control_line("key_press,a\n"), "key_press,a\n");
        assert_eq!(normalize_control_line("click,1\r\n"), "click,1\n");
        assert_eq!(normalize_control_line("scroll,-3\n\n\n"), "scroll,-3\n");
        assert_eq!(normalize_control_line(""), "\n");
        // Interior newlines are payload, not delimiters.
        assert_eq!(normalize_control_line("a\nb"), "a\nb\n");
    }
}
