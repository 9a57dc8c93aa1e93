//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.
//!
//! Framing is owned here: `Content-Length` is always computed from the body and
//! `Connection` is always `close`. Values for either header supplied by a
//! caller (or forwarded from a CGI script) are discarded.

use bytes::{BufMut, BytesMut};
use serde_json::{Value, json};

use super::{Headers, StatusCode};

/// Fallback content type when none was set.
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use webgate::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .content_type("application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// assert!(text.contains("Connection: close\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    content_type: Option<String>,
    headers: Headers,
    body: Vec<u8>,
    /// Frame the body's length but leave the bytes off the wire (`HEAD`).
    omit_body: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            headers: Headers::new(),
            body: Vec::new(),
            omit_body: false,
        }
    }

    /// Creates a response whose body is `value` serialized as JSON.
    ///
    /// Object keys keep the order in which they were inserted, so the same
    /// logical value always serializes to the same bytes.
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status)
            .content_type("application/json")
            .body(value.to_string())
    }

    /// Creates the standard error envelope:
    /// `{"status":"error","code":<int>,"message":<string>}`.
    ///
    /// # Examples
    ///
    /// ```
    /// use webgate::http::{Response, StatusCode};
    ///
    /// let response = Response::error(StatusCode::NotFound, "Not Found");
    /// assert_eq!(response.payload(), br#"{"status":"error","code":404,"message":"Not Found"}"#);
    /// ```
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::json(
            status,
            &json!({
                "status": "error",
                "code": status.as_u16(),
                "message": message,
            }),
        )
    }

    /// Sets the `Content-Type` header.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Keeps the headers, `Content-Length` included, but sends no body bytes.
    /// Used to answer `HEAD`.
    #[must_use]
    pub fn without_body(mut self) -> Self {
        self.omit_body = true;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the content type that will be written.
    pub fn content_type_value(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Returns the extra headers (everything but the framing headers).
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes.
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Layout: status line, `Content-Type`, extra headers, `Content-Length`,
    /// `Connection: close`, blank line, body (unless [`Response::without_body`]).
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();
        self.headers.remove("content-type");
        self.headers.remove("content-length");
        self.headers.remove("connection");

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        let content_type = self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        buf.put(format!("Content-Type: {content_type}\r\n").as_bytes());
        buf.put(self.headers.to_string().as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"Connection: close\r\n"[..]);

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        if !self.omit_body {
            buf.put(self.body.as_slice());
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn content_length_of(wire: &str) -> usize {
        wire.lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/plain\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("Connection: close\r\n\r\nHello"));
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let body = "héllo wörld";
        let s = to_string(Response::new(StatusCode::Ok).body(body).into_bytes());
        assert_eq!(content_length_of(&s), body.len());
    }

    #[test]
    fn caller_framing_headers_are_replaced() {
        let r = Response::new(StatusCode::Ok)
            .header("Content-Length", "999")
            .header("Connection", "keep-alive")
            .header("X-Powered-By", "php")
            .body("ok");
        let s = to_string(r.into_bytes());
        assert_eq!(s.matches("Content-Length").count(), 1);
        assert_eq!(content_length_of(&s), 2);
        assert!(!s.contains("keep-alive"));
        assert!(s.contains("X-Powered-By: php\r\n"));
    }

    #[test]
    fn head_response_keeps_length_drops_bytes() {
        let s = to_string(
            Response::new(StatusCode::Ok)
                .content_type("text/html")
                .body("<p>hi</p>")
                .without_body()
                .into_bytes(),
        );
        assert_eq!(content_length_of(&s), 9);
        assert!(s.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn unknown_status_uses_generic_reason() {
        let s = to_string(Response::new(StatusCode::Custom(418)).into_bytes());
        assert!(s.starts_with("HTTP/1.1 418 Error\r\n"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn error_envelope_is_stable() {
        let a = Response::error(StatusCode::BadRequest, "No data provided");
        let b = Response::error(StatusCode::BadRequest, "No data provided");
        assert_eq!(a.payload(), b.payload());
        assert_eq!(
            a.payload(),
            br#"{"status":"error","code":400,"message":"No data provided"}"#
        );
        assert_eq!(a.content_type_value(), "application/json");
    }

    #[test]
    fn binary_body_passes_verbatim() {
        let payload = vec![0u8, 159, 146, 150, 13, 10, 13, 10];
        let bytes = Response::new(StatusCode::Ok)
            .content_type("image/png")
            .body_bytes(payload.clone())
            .into_bytes();
        assert!(bytes.ends_with(&payload));
    }
}
