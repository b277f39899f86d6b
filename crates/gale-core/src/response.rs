//! HTTP Response types
//!
//! Responses are rendered to wire bytes once at startup; the event loop only
//! ever sends the pre-rendered buffer.

use bytes::Bytes;
use smallvec::SmallVec;

use crate::config::{ConnectionMode, ServerConfig};

/// Body of the built-in response
pub const DEFAULT_BODY: &[u8] = b"OK";

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            204 => "No Content",
            _ => "Unknown",
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// HTTP Response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    /// Response headers (stack-allocated for small header counts)
    pub headers: SmallVec<[(String, String); 4]>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: SmallVec::new(),
            body: Bytes::new(),
        }
    }

    /// The fixed reply for a connection mode: 200, body `OK`
    pub fn fixed(mode: ConnectionMode) -> Self {
        let builder = ResponseBuilder::new(StatusCode::OK);
        let builder = match mode {
            ConnectionMode::Persistent => builder
                .header("Connection", "keep-alive")
                .header("Keep-Alive", "timeout=60, max=1000"),
            ConnectionMode::SingleShot => builder.header("Connection", "close"),
        };
        builder.body(Bytes::from_static(DEFAULT_BODY)).build()
    }

    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to HTTP/1.1 wire format
    ///
    /// `Content-Length` is always emitted, directly after the status line.
    pub fn to_http1_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(128 + self.body.len());

        // Status line
        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.0.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.reason_phrase().as_bytes());
        buf.extend_from_slice(b"\r\n");

        buf.extend_from_slice(b"Content-Length: ");
        buf.extend_from_slice(self.body.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        // End of headers
        buf.extend_from_slice(b"\r\n");

        buf.extend_from_slice(&self.body);

        Bytes::from(buf)
    }
}

/// Builder for constructing responses
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

/// Wire bytes the server sends per request: the override if configured,
/// otherwise the fixed reply for the configured mode.
pub fn render(config: &ServerConfig) -> Bytes {
    match &config.response {
        Some(raw) => raw.clone(),
        None => Response::fixed(config.mode).to_http1_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_wire_format() {
        let bytes = Response::fixed(ConnectionMode::Persistent).to_http1_bytes();
        assert_eq!(
            &bytes[..],
            &b"HTTP/1.1 200 OK\r\n\
               Content-Length: 2\r\n\
               Connection: keep-alive\r\n\
               Keep-Alive: timeout=60, max=1000\r\n\
               \r\n\
               OK"[..]
        );
    }

    #[test]
    fn test_single_shot_wire_format() {
        let bytes = Response::fixed(ConnectionMode::SingleShot).to_http1_bytes();
        let s = std::str::from_utf8(&bytes).unwrap();
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(!s.contains("Keep-Alive"));
        assert!(s.ends_with("\r\n\r\nOK"));
    }

    #[test]
    fn test_header_lookup() {
        let res = Response::fixed(ConnectionMode::Persistent);
        assert_eq!(res.header("connection"), Some("keep-alive"));
        assert_eq!(res.header("x-missing"), None);
        assert_eq!(res.status.to_string(), "200 OK");
    }

    #[test]
    fn test_render_override() {
        let config = ServerConfig::default().with_response(&b"raw"[..]);
        assert_eq!(&render(&config)[..], b"raw");
    }

    #[test]
    fn test_empty_body() {
        let bytes = ResponseBuilder::new(StatusCode::NO_CONTENT).build().to_http1_bytes();
        assert_eq!(&bytes[..], b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n");
    }
}
