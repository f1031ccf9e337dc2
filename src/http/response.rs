//! Finished HTTP/1.1 responses handed back to the connection engine.
//!
//! An [`OutgoingResponse`] is produced exactly once per request, when the
//! response façade finalizes, and serialized to a byte buffer for
//! transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// A finalized response: status, headers and the complete body.
///
/// # Examples
///
/// ```
/// use rexpress::http::{OutgoingResponse, StatusCode};
///
/// let response = OutgoingResponse::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes(true);
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl OutgoingResponse {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Assembles a response from already-collected parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Sets a response header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Length: <n>` (always written, replacing any handler-set value).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self, keep_alive: bool) -> BytesMut {
        let content_length = self.body.len();

        self.headers.remove("content-length");
        let connection = if keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line; the reason phrase may be empty for unregistered codes
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or_default()
            )
            .as_bytes(),
        );

        buf.put(self.headers.to_string().as_bytes());

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for OutgoingResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = OutgoingResponse::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes(true));
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn no_body_no_content_type() {
        let r = OutgoingResponse::new(StatusCode::NO_CONTENT);
        let s = to_string(r.into_bytes(true));
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let s = to_string(OutgoingResponse::default().into_bytes(false));
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn handler_content_length_is_replaced() {
        let r = OutgoingResponse::new(StatusCode::OK)
            .header("Content-Length", "999")
            .body("ab");
        let s = to_string(r.into_bytes(true));
        assert!(!s.contains("999"));
        assert!(s.contains("Content-Length: 2\r\n"));
    }

    #[test]
    fn unregistered_status_has_empty_reason() {
        let r = OutgoingResponse::new(StatusCode::new(599).unwrap());
        let s = to_string(r.into_bytes(true));
        assert!(s.starts_with("HTTP/1.1 599 \r\n"));
    }
}
