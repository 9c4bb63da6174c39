//! Minimal HTTP/1.1 request handling
//!
//! The server only needs the request line of each inbound request to route
//! it: `/stream` joins the MJPEG stream, anything else gets the viewer page.
//! Request headers are read (to find the end of the head) and ignored.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Path of the MJPEG stream endpoint
pub const STREAM_PATH: &str = "/stream";

/// Largest request head accepted
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Viewer page served for every path other than the stream
///
/// The image reconnects on error after a short delay with a cache-busting
/// query so a dropped stream recovers without a page reload.
pub const VIEWER_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>MJPEG Stream</title>
    <style>
        body { margin: 0; padding: 0; background: #000; height: 100vh; display: flex; justify-content: center; align-items: center; }
        img { max-width: 100%; max-height: 100vh; object-fit: contain; }
    </style>
</head>
<body>
    <img id="stream" src="/stream" alt="MJPEG Stream">
    <script>
        const img = document.getElementById('stream');
        img.onerror = () => {
            setTimeout(() => { img.src = '/stream?t=' + Date.now(); }, 1000);
        };
    </script>
</body>
</html>
"#;

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, as sent
    pub method: String,
    /// Lowercased path without query string
    pub path: String,
}

/// Where a request is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The MJPEG stream
    Stream,
    /// The static viewer page
    Viewer,
}

impl RequestHead {
    /// Route for this request
    pub fn route(&self) -> Route {
        if self.path == STREAM_PATH {
            Route::Stream
        } else {
            Route::Viewer
        }
    }
}

/// Parse a complete request head
///
/// Returns `Ok(None)` while the head is incomplete.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<RequestHead>> {
    let end = match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => pos,
        None if buf.len() > MAX_REQUEST_HEAD => {
            return Err(Error::BadRequest("request head too large".into()))
        }
        None => return Ok(None),
    };

    let head = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::BadRequest("request head is not UTF-8".into()))?;
    let request_line = head.lines().next().unwrap_or_default();

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m, t, v),
        _ => {
            return Err(Error::BadRequest(format!(
                "malformed request line: {:?}",
                request_line
            )))
        }
    };

    if !version.starts_with("HTTP/1.") {
        return Err(Error::BadRequest(format!("unsupported version {}", version)));
    }

    let path = target.split(['?', '#']).next().unwrap_or("/");
    Ok(Some(RequestHead {
        method: method.to_string(),
        path: path.to_ascii_lowercase(),
    }))
}

/// Read from `reader` until a complete request head has arrived
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if let Some(head) = parse_request_head(&buf)? {
            return Ok(head);
        }

        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::BadRequest(
                "connection closed before request head".into(),
            ));
        }
    }
}

fn response(status: &str, content_type: &str, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(128 + body.len());
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
            status,
            content_type,
            body.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(body);
    out.freeze()
}

/// Full response carrying the viewer page
pub fn viewer_response() -> Bytes {
    response("200 OK", "text/html; charset=utf-8", VIEWER_PAGE.as_bytes())
}

/// Response sent when the client cap is reached
pub fn service_unavailable_response() -> Bytes {
    response(
        "503 Service Unavailable",
        "text/plain",
        b"Service Unavailable",
    )
}

/// Response sent for unparseable requests
pub fn bad_request_response() -> Bytes {
    response("400 Bad Request", "text/plain", b"Bad Request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_request() {
        let head = parse_request_head(b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.route(), Route::Stream);
    }

    #[test]
    fn test_query_and_case_are_normalized() {
        let head = parse_request_head(b"GET /Stream?t=1712 HTTP/1.1\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.path, "/stream");
        assert_eq!(head.route(), Route::Stream);
    }

    #[test]
    fn test_other_paths_route_to_viewer() {
        for target in ["/", "/index.html", "/streams", "/stream/x"] {
            let raw = format!("GET {} HTTP/1.1\r\n\r\n", target);
            let head = parse_request_head(raw.as_bytes()).unwrap().unwrap();
            assert_eq!(head.route(), Route::Viewer, "target {}", target);
        }
    }

    #[test]
    fn test_incomplete_head() {
        assert!(parse_request_head(b"GET /stream HTTP/1.1\r\nHost")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_request_line() {
        assert!(parse_request_head(b"GARBAGE\r\n\r\n").is_err());
        assert!(parse_request_head(b"GET / SPDY/3\r\n\r\n").is_err());
    }

    #[test]
    fn test_oversized_head() {
        let raw = vec![b'a'; MAX_REQUEST_HEAD + 1];
        assert!(parse_request_head(&raw).is_err());
    }

    #[tokio::test]
    async fn test_read_request_head_across_reads() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"GET /str")
            .read(b"eam HTTP/1.1\r\n")
            .read(b"\r\n")
            .build();

        let head = read_request_head(&mut mock).await.unwrap();
        assert_eq!(head.route(), Route::Stream);
    }

    #[tokio::test]
    async fn test_read_request_head_eof() {
        let mut mock = tokio_test::io::Builder::new().read(b"GET /").build();
        assert!(read_request_head(&mut mock).await.is_err());
    }

    #[test]
    fn test_service_unavailable_response() {
        let bytes = service_unavailable_response();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.ends_with("\r\n\r\nService Unavailable"));
    }

    #[test]
    fn test_viewer_page_embeds_stream() {
        let bytes = viewer_response();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html"));
        assert!(text.contains(r#"src="/stream""#));
        assert!(text.contains("Date.now()"));
    }
}
