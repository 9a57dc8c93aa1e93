//! Header storage shared by requests and responses.
//!
//! Names compare case-insensitively. The two sides fill the list differently:
//!
//! - the request parser lower-cases each name and stores it with
//!   [`Headers::set`], so a name sent twice keeps its last value;
//! - responses (and headers forwarded from a CGI script) use
//!   [`Headers::insert`], which appends and keeps script order.
//!
//! `Content-Length` and `Connection` are never taken from this list when a
//! response is written; the response builder owns them.

use std::fmt;

/// Ordered list of `(name, value)` pairs with case-insensitive lookup.
///
/// # Examples
///
/// ```
/// use webgate::http::Headers;
///
/// let mut request_headers = Headers::new();
/// request_headers.set("x-token", "first");
/// request_headers.set("x-token", "second");
/// assert_eq!(request_headers.get("X-Token"), Some("second"));
/// assert_eq!(request_headers.len(), 1);
///
/// let mut script_headers = Headers::new();
/// script_headers.insert("Set-Cookie", "a=1");
/// script_headers.insert("Set-Cookie", "b=2");
/// assert_eq!(script_headers.to_string(), "Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends `name: value`, keeping any earlier entries of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Stores `name: value` as the only entry of that name (last value wins).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Value of the first entry named `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Drops every entry named `name`. Returns whether anything was dropped.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.entries.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Wire format: one `Name: value\r\n` line per entry, in stored order.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.entries
            .iter()
            .try_for_each(|(name, value)| write!(f, "{name}: {value}\r\n"))
    }
}
