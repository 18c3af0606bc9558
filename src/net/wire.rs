//! Length-prefixed text frames for peer-to-peer dialogue.
//!
//! Frame format: a fixed 64-byte header holding the payload length as ASCII
//! decimal, right-padded with spaces, followed by that many bytes of UTF-8
//! payload. A dialogue is one request then one reply; both directions use
//! the same framing and both ends close afterwards.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed width of the length header.
pub const HEADER_LEN: usize = 64;
/// Maximum allowed payload size. Larger frames terminate the connection.
pub const MAX_LENGTH: usize = 2048;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Length header is not a decimal number: {0:?}")]
    BadLength(String),

    #[error("Frame too large: {0} bytes (max: {MAX_LENGTH})")]
    Oversized(usize),

    #[error("Payload is not valid UTF-8")]
    BadEncoding,
}

/// Write one framed message.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &str,
) -> Result<(), WireError> {
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_LENGTH {
        return Err(WireError::Oversized(bytes.len()));
    }

    let mut header = [b' '; HEADER_LEN];
    let digits = bytes.len().to_string();
    header[..digits.len()].copy_from_slice(digits.as_bytes());

    writer.write_all(&header).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. Short reads, a non-numeric header, an oversized
/// length and invalid UTF-8 are all errors; the caller drops the connection.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, WireError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let text = std::str::from_utf8(&header).map_err(|_| WireError::BadEncoding)?;
    let trimmed = text.trim_end_matches(' ');
    let len: usize = trimmed
        .parse()
        .map_err(|_| WireError::BadLength(trimmed.to_string()))?;
    if len > MAX_LENGTH {
        return Err(WireError::Oversized(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    String::from_utf8(payload).map_err(|_| WireError::BadEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "Your master?").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let message = read_frame(&mut cursor).await.unwrap();
        assert_eq!(message, "Your master?");
    }

    #[tokio::test]
    async fn test_header_is_space_padded_ascii() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "ip = 127.0.0.7").await.unwrap();

        assert_eq!(&buf[..2], b"14");
        assert!(buf[2..HEADER_LEN].iter().all(|&b| b == b' '));
        assert_eq!(&buf[HEADER_LEN..], b"ip = 127.0.0.7");
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_short_read_is_an_error() {
        let mut cursor = std::io::Cursor::new(b"12".to_vec());
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_non_numeric_header_rejected() {
        let mut header = [b' '; HEADER_LEN];
        header[..5].copy_from_slice(b"abcde");
        let mut cursor = std::io::Cursor::new(header.to_vec());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::BadLength(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut header = [b' '; HEADER_LEN];
        let digits = (MAX_LENGTH + 1).to_string();
        header[..digits.len()].copy_from_slice(digits.as_bytes());
        let mut cursor = std::io::Cursor::new(header.to_vec());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::Oversized(_))
        ));

        let long = "x".repeat(MAX_LENGTH + 1);
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &long).await,
            Err(WireError::Oversized(_))
        ));
    }
}
