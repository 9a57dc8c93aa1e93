//! Request classification — decide which handler serves a request.
//!
//! [`classify`] turns a parsed [`Request`] into a [`RouteDecision`]. The rules
//! are applied in order:
//!
//! | Clean path                          | Decision                          |
//! |-------------------------------------|-----------------------------------|
//! | starts with `/api/`                 | `Api { resource, action, identifier }` |
//! | contains a `..` segment             | `Forbidden`                       |
//! | file missing under the document root| `NotFound`                        |
//! | directory without `index.html`      | `Forbidden`                       |
//! | `.php` file (any case)              | `Cgi { script }`                  |
//! | any other file                      | `Static { path }`                 |
//!
//! A path ending in `/` is looked up as `<path>index.html`.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::Request;

/// Prefix that sends a request to the API handler.
pub const API_PREFIX: &str = "/api/";

const INDEX_FILE: &str = "index.html";

/// Outcome of routing one request. Computed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Serve the file at `path` as-is.
    Static { path: PathBuf },
    /// Table API call. Missing path components are empty strings.
    Api {
        resource: String,
        action: String,
        identifier: String,
    },
    /// Run `script` through the CGI interpreter.
    Cgi { script: PathBuf },
    /// The target exists but may not be served.
    Forbidden,
    NotFound,
}

/// Classifies `request` against the files under `document_root`.
///
/// Never fails: anything that does not resolve to a servable file is
/// [`RouteDecision::NotFound`] or [`RouteDecision::Forbidden`]. Filesystem
/// lookups go through `tokio::fs`. API path segments are percent-decoded one
/// by one, so an encoded `/` stays inside its segment.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use webgate::Request;
/// use webgate::router::{RouteDecision, classify};
///
/// # #[tokio::main]
/// # async fn main() {
/// let request = Request::parse(b"GET /api/db/users/ada%20l HTTP/1.1\r\n\r\n").unwrap();
/// assert_eq!(
///     classify(&request, Path::new("/srv/www")).await,
///     RouteDecision::Api {
///         resource: "db".into(),
///         action: "users".into(),
///         identifier: "ada l".into(),
///     }
/// );
/// # }
/// ```
pub async fn classify(request: &Request, document_root: &Path) -> RouteDecision {
    let clean_path = request.path();

    if let Some(rest) = clean_path.strip_prefix(API_PREFIX) {
        let mut parts = rest.splitn(3, '/');
        let mut next = || {
            let segment = parts.next().unwrap_or_default();
            percent_decode_str(segment).decode_utf8_lossy().into_owned()
        };
        return RouteDecision::Api {
            resource: next(),
            action: next(),
            identifier: next(),
        };
    }

    let decoded = percent_decode_str(clean_path).decode_utf8_lossy();
    if decoded.split('/').any(|segment| segment == "..") {
        return RouteDecision::Forbidden;
    }

    let mut file_path = document_root.join(decoded.trim_start_matches('/'));
    if decoded.ends_with('/') {
        file_path.push(INDEX_FILE);
    }

    let Ok(metadata) = tokio::fs::metadata(&file_path).await else {
        return RouteDecision::NotFound;
    };

    if metadata.is_dir() {
        file_path.push(INDEX_FILE);
        if tokio::fs::metadata(&file_path).await.is_err() {
            return RouteDecision::Forbidden;
        }
    }

    let is_php = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("php"));

    if is_php {
        RouteDecision::Cgi { script: file_path }
    } else {
        RouteDecision::Static { path: file_path }
    }
}

/// Returns the MIME type for a static file, by extension (case-insensitive).
///
/// Unknown extensions are served as `text/plain`.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "text/plain",
    }
}
