//! API access control — a single HTTP Basic credential check per request.
//!
//! When credentials are configured, every `/api/` request must carry
//! `Authorization: Basic base64(username:password)` matching them. Static files
//! and CGI scripts are not covered.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Response, StatusCode};

/// Value of the `WWW-Authenticate` header sent with a 401.
pub const CHALLENGE: &str = "Basic realm=\"webgate\"";

/// Why a request was not let through.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    Missing,

    #[error("Authorization header is not valid Basic credentials")]
    Malformed,

    #[error("credentials rejected")]
    Rejected,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        StatusCode::Unauthorized
    }

    /// The 401 sent back to the client. The reason is only logged.
    pub fn into_response(self) -> Response {
        Response::error(self.status(), "Unauthorized").header("WWW-Authenticate", CHALLENGE)
    }
}

/// The one username/password pair allowed to use the API.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Checks an `Authorization` header value against these credentials.
    ///
    /// # Examples
    ///
    /// ```
    /// use webgate::security::{AuthError, Credentials};
    ///
    /// let creds = Credentials::new("admin", "admin123");
    /// assert_eq!(creds.verify(Some("Basic YWRtaW46YWRtaW4xMjM=")), Ok(()));
    /// assert_eq!(creds.verify(None), Err(AuthError::Missing));
    /// ```
    pub fn verify(&self, authorization: Option<&str>) -> Result<(), AuthError> {
        let header = authorization.ok_or(AuthError::Missing)?.trim();
        let (scheme, encoded) = header.split_once(' ').ok_or(AuthError::Malformed)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::Malformed);
        }

        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;

        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if user_ok & pass_ok {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
