//! HTTP/1.1 request parsing.
//!
//! The parser is single-shot: it is handed one buffer that already holds the
//! whole header section (the server's framing layer reads until the blank-line
//! marker shows up) and it never asks for more data. Whatever follows the first
//! `\r\n\r\n` is taken as the body, as-is, even if it contains further blank
//! lines. A body that arrives in a later read than the headers is not waited
//! for; requests are assumed to fit in the buffer the framing layer collected.

use std::collections::BTreeMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// The header/body separator.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request is incomplete: no blank line after the header section")]
    Incomplete,

    #[error("malformed request: {0}")]
    Malformed(&'static str),
}

/// A fully parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer and never mutated
/// afterwards.
///
/// # Examples
///
/// ```
/// use webgate::http::request::Request;
///
/// let raw = b"GET /hello?name=world%21 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world!"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    version: String,
    headers: Headers,
    query: BTreeMap<String, String>,
    body: Bytes,
}

impl Request {
    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — `buf` holds no `\r\n\r\n` marker.
    /// - [`RequestError::Malformed`] — the request line has fewer than three tokens.
    pub fn parse(buf: &[u8]) -> Result<Self, RequestError> {
        let boundary = header_boundary(buf).ok_or(RequestError::Incomplete)?;
        let head = String::from_utf8_lossy(&buf[..boundary]);
        let body = Bytes::copy_from_slice(&buf[boundary + HEADER_TERMINATOR.len()..]);

        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut tokens = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(RequestError::Malformed(
                "request line needs a method, a path and a version",
            ));
        };

        let method: Method = method.parse().unwrap_or_else(|never| match never {});

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), parse_query_string(query)),
            None => (target.to_owned(), BTreeMap::new()),
        };

        let mut headers = Headers::with_capacity(16);
        for line in lines {
            // Lines without a colon carry nothing we can use.
            if let Some((name, value)) = line.split_once(':') {
                headers.set(name.trim().to_ascii_lowercase(), value.trim());
            }
        }

        Ok(Self {
            method,
            path,
            version: version.to_owned(),
            headers,
            query,
            body,
        })
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the version token of the request line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the request headers. Names are stored lower-cased.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns every decoded query parameter.
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Returns a decoded query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the `Content-Type` header value, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }
}

/// Returns the offset of the first `\r\n\r\n` in `buf`.
pub fn header_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Parses a URL query string (`key=value&key2=value2`) into an ordered map.
///
/// `+` decodes to a space and `%XX` escapes are percent-decoded. Later
/// occurrences of a key overwrite earlier ones. Empty pairs are skipped.
pub fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
