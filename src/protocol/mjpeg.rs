//! MJPEG multipart-replace framing
//!
//! A stream is one HTTP response whose body never ends. It opens with
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: multipart/x-mixed-replace; boundary=--boundary\r\n
//! \r\n
//! ```
//!
//! and then carries one part per frame:
//!
//! ```text
//! --boundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of JPEG>\r\n
//! \r\n
//! ```
//!
//! Image-tag clients (browsers, `<img src>`) replace the displayed image
//! with each part as it arrives. The layout is byte exact.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Boundary token separating parts
pub const BOUNDARY: &str = "--boundary";

/// Content type of the stream response
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--boundary";

/// Response head written once per client before the first part
pub const STREAM_HEADER: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=--boundary\r\n\r\n";

/// Bytes following every JPEG payload
pub const PART_TRAILER: &[u8] = b"\r\n\r\n";

/// Upper bound on a part header, used by the parser to reject garbage
const MAX_PART_HEADER: usize = 1024;

/// Headers preceding one JPEG payload
pub fn part_header(content_length: usize) -> Bytes {
    Bytes::from(format!(
        "{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY, content_length
    ))
}

/// Total bytes [`write_frame`] puts on the wire for a payload
pub fn encoded_len(payload_len: usize, with_stream_header: bool) -> usize {
    let head = if with_stream_header {
        STREAM_HEADER.len()
    } else {
        0
    };
    head + part_header(payload_len).len() + payload_len + PART_TRAILER.len()
}

/// Write one frame part, preceded by the stream header if requested
///
/// Returns the number of bytes written. The writer is flushed so the part
/// reaches the client as a unit.
pub async fn write_frame<W>(
    writer: &mut W,
    jpeg: &[u8],
    with_stream_header: bool,
) -> io::Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = part_header(jpeg.len());
    let mut head = BytesMut::with_capacity(STREAM_HEADER.len() + header.len());
    if with_stream_header {
        head.extend_from_slice(STREAM_HEADER);
    }
    head.extend_from_slice(&header);

    writer.write_all(&head).await?;
    writer.write_all(jpeg).await?;
    writer.write_all(PART_TRAILER).await?;
    writer.flush().await?;

    Ok(head.len() + jpeg.len() + PART_TRAILER.len())
}

/// One decoded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Declared content type
    pub content_type: String,
    /// Payload, exactly `Content-Length` bytes
    pub data: Bytes,
}

/// Error produced by [`MultipartParser`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Response status line was not `200`
    BadStatus(String),
    /// Response did not declare the multipart-replace content type
    BadContentType(Option<String>),
    /// A part did not start with the boundary line
    MissingBoundary,
    /// A part lacked a valid `Content-Length`
    MissingContentLength,
    /// Part headers grew past the sanity limit
    HeaderTooLarge,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::BadStatus(line) => write!(f, "Unexpected status line: {}", line),
            ParseError::BadContentType(ct) => write!(f, "Unexpected content type: {:?}", ct),
            ParseError::MissingBoundary => write!(f, "Part does not start with boundary"),
            ParseError::MissingContentLength => write!(f, "Part has no valid Content-Length"),
            ParseError::HeaderTooLarge => write!(f, "Part header too large"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Incremental parser for a multipart-replace stream
///
/// Feed bytes as they arrive with [`push`](Self::push) and pull complete
/// parts with [`next_part`](Self::next_part). Used by tests and by clients
/// that consume the stream programmatically.
#[derive(Debug, Default)]
pub struct MultipartParser {
    buf: BytesMut,
    expect_response_head: bool,
}

impl MultipartParser {
    /// Parser for a bare multipart body
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser for a full HTTP response: validates the head, then parts
    pub fn for_response() -> Self {
        Self {
            buf: BytesMut::new(),
            expect_response_head: true,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete part, or `None` if more bytes are needed
    pub fn next_part(&mut self) -> Result<Option<Part>, ParseError> {
        if self.expect_response_head {
            if !self.parse_response_head()? {
                return Ok(None);
            }
            self.expect_response_head = false;
        }

        // Separators between parts
        while self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
        }

        let head_end = match find(&self.buf, b"\r\n\r\n") {
            Some(pos) => pos,
            None if self.buf.len() > MAX_PART_HEADER => return Err(ParseError::HeaderTooLarge),
            None => return Ok(None),
        };

        let head = String::from_utf8_lossy(&self.buf[..head_end]).into_owned();
        let mut lines = head.split("\r\n");
        if lines.next() != Some(BOUNDARY) {
            return Err(ParseError::MissingBoundary);
        }

        let mut content_type = String::new();
        let mut content_length = None;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim();
                if name.eq_ignore_ascii_case("content-type") {
                    content_type = value.to_string();
                } else if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse::<usize>().ok();
                }
            }
        }
        let length = content_length.ok_or(ParseError::MissingContentLength)?;

        let body_start = head_end + 4;
        if self.buf.len() < body_start + length {
            return Ok(None);
        }

        self.buf.advance(body_start);
        let data = self.buf.split_to(length).freeze();
        Ok(Some(Part { content_type, data }))
    }

    fn parse_response_head(&mut self) -> Result<bool, ParseError> {
        let end = match find(&self.buf, b"\r\n\r\n") {
            Some(pos) => pos,
            None => return Ok(false),
        };

        let head = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        let mut lines = head.split("\r\n");
        let status = lines.next().unwrap_or_default();
        if status.split_whitespace().nth(1) != Some("200") {
            return Err(ParseError::BadStatus(status.to_string()));
        }

        let content_type = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.trim().to_string());
        if content_type.as_deref() != Some(STREAM_CONTENT_TYPE) {
            return Err(ParseError::BadContentType(content_type));
        }

        self.buf.advance(end + 4);
        Ok(true)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x0D, 0x0A, 0x0D, 0x0A, 0xFF, 0xD9];

    #[test]
    fn test_part_header_bytes() {
        assert_eq!(
            &part_header(1234)[..],
            b"--boundary\r\nContent-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_write_frame_with_header_is_byte_exact() {
        let mut expected = Vec::new();
        expected.extend_from_slice(STREAM_HEADER);
        expected.extend_from_slice(
            b"--boundary\r\nContent-Type: image/jpeg\r\nContent-Length: 10\r\n\r\n",
        );

        let mut mock = Builder::new()
            .write(&expected)
            .write(JPEG)
            .write(b"\r\n\r\n")
            .build();

        let written = write_frame(&mut mock, JPEG, true).await.unwrap();
        assert_eq!(written, encoded_len(JPEG.len(), true));
    }

    #[tokio::test]
    async fn test_write_frame_without_header() {
        let mut mock = Builder::new()
            .write(b"--boundary\r\nContent-Type: image/jpeg\r\nContent-Length: 10\r\n\r\n")
            .write(JPEG)
            .write(b"\r\n\r\n")
            .build();

        let written = write_frame(&mut mock, JPEG, false).await.unwrap();
        assert_eq!(written, encoded_len(JPEG.len(), false));
    }

    #[tokio::test]
    async fn test_write_error_propagates() {
        let mut mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let err = write_frame(&mut mock, JPEG, true).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_written_part_parses_to_exact_payload() {
        let mut wire = Vec::new();
        write_frame(&mut wire, JPEG, true).await.unwrap();

        let mut parser = MultipartParser::for_response();
        parser.push(&wire);

        let part = parser.next_part().unwrap().unwrap();
        assert_eq!(part.content_type, "image/jpeg");
        assert_eq!(&part.data[..], JPEG);
        assert!(parser.next_part().unwrap().is_none());
        assert_eq!(parser.buffered(), 0);
    }

    #[tokio::test]
    async fn test_parser_handles_split_delivery() {
        let mut wire = Vec::new();
        write_frame(&mut wire, JPEG, true).await.unwrap();
        write_frame(&mut wire, &JPEG[..4], false).await.unwrap();

        let mut parser = MultipartParser::for_response();
        let mut parts = Vec::new();
        for byte in wire {
            parser.push(&[byte]);
            while let Some(part) = parser.next_part().unwrap() {
                parts.push(part);
            }
        }

        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0].data[..], JPEG);
        assert_eq!(&parts[1].data[..], &JPEG[..4]);
    }

    #[test]
    fn test_parser_rejects_missing_boundary() {
        let mut parser = MultipartParser::new();
        parser.push(b"--other\r\nContent-Length: 1\r\n\r\nx");
        assert_eq!(parser.next_part(), Err(ParseError::MissingBoundary));
    }

    #[test]
    fn test_parser_rejects_missing_length() {
        let mut parser = MultipartParser::new();
        parser.push(b"--boundary\r\nContent-Type: image/jpeg\r\n\r\nxx");
        assert_eq!(parser.next_part(), Err(ParseError::MissingContentLength));
    }

    #[test]
    fn test_parser_rejects_error_status() {
        let mut parser = MultipartParser::for_response();
        parser.push(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");
        assert!(matches!(parser.next_part(), Err(ParseError::BadStatus(_))));
    }
}
