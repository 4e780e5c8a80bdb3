//! `Content-Length` framing.
//!
//! A frame is a block of `Name: value` header lines terminated by an empty
//! line, followed by exactly `Content-Length` bytes of body. Headers other
//! than `Content-Length` are ignored.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Longest accepted header line.
const MAX_HEADER_LINE: usize = 1024;

/// Reads one frame body.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// [`TransportError::ConnectionClosed`] if the stream ends inside a frame,
/// [`TransportError::InvalidHeader`] or [`TransportError::FrameTooLarge`]
/// for bad headers. After a header error the stream position is unknown and
/// the connection should be dropped.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut in_headers = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        // At most one byte past the cap is buffered for a line without a newline.
        let read = (&mut *reader)
            .take(MAX_HEADER_LINE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return if in_headers {
                Err(TransportError::ConnectionClosed)
            } else {
                Ok(None)
            };
        }
        if line.len() > MAX_HEADER_LINE {
            return Err(TransportError::InvalidHeader(format!(
                "header line longer than {MAX_HEADER_LINE} bytes"
            )));
        }

        let header = std::str::from_utf8(&line)
            .map_err(|_| TransportError::InvalidHeader("header is not valid UTF-8".to_string()))?
            .trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if in_headers {
                break;
            }
            // Tolerate blank lines between frames.
            continue;
        }
        in_headers = true;

        let Some((name, value)) = header.split_once(':') else {
            return Err(TransportError::InvalidHeader(header.to_string()));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let len = value.trim().parse::<usize>().map_err(|_| {
                TransportError::InvalidHeader(format!("bad Content-Length: {}", value.trim()))
            })?;
            content_length = Some(len);
        }
    }

    let len = content_length
        .ok_or_else(|| TransportError::InvalidHeader("missing Content-Length".to_string()))?;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::ConnectionClosed
        } else {
            TransportError::Io(e)
        }
    })?;
    Ok(Some(body))
}

/// Prefixes `body` with its header.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(body)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_all(input: &[u8]) -> Vec<Result<Option<Vec<u8>>, String>> {
        let mut reader = BufReader::new(input);
        let mut out = Vec::new();
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(body)) => out.push(Ok(Some(body))),
                Ok(None) => {
                    out.push(Ok(None));
                    break;
                }
                Err(e) => {
                    out.push(Err(e.to_string()));
                    break;
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut input = encode_frame(br#"{"id":1}"#);
        input.extend(encode_frame(br#"{"id":2}"#));
        let frames = read_all(&input).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Ok(Some(br#"{"id":1}"#.to_vec())));
        assert_eq!(frames[2], Ok(None));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Content-Len")
            .read(b"gth: 9\r")
            .read(b"\n\r\n{\"id\":")
            .read(b" 7}")
            .build();
        let mut reader = BufReader::new(mock);
        let body = read_frame(&mut reader).await.unwrap();
        assert_eq!(body, Some(br#"{"id": 7}"#.to_vec()));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ignores_other_headers() {
        let input = b"Content-Type: application/json\r\ncontent-length: 2\r\n\r\n{}";
        let frames = read_all(input).await;
        assert_eq!(frames[0], Ok(Some(b"{}".to_vec())));
    }

    #[tokio::test]
    async fn test_missing_length_is_invalid_header() {
        let frames = read_all(b"Content-Type: json\r\n\r\n{}").await;
        assert!(frames[0].as_ref().unwrap_err().contains("missing Content-Length"));
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_closed() {
        let mut reader = BufReader::new(&b"Content-Length: 10\r\n\r\n{}"[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_endless_header_line_is_cut_off() {
        let mut input = b"Content-Length: 2\r\nX-Padding: ".to_vec();
        input.resize(8 * 1024 * 1024, b'A');
        let mut reader = std::io::Cursor::new(input);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidHeader(_)));

        let first_line = "Content-Length: 2\r\n".len() as u64;
        assert!(reader.position() <= first_line + MAX_HEADER_LINE as u64 + 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let input = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_LEN + 1);
        let mut reader = BufReader::new(input.as_bytes());
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, b"{}").await.unwrap();
        assert_eq!(out, b"Content-Length: 2\r\n\r\n{}");
    }
}
