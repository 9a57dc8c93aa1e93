//! Server configuration.
//!
//! One immutable [`Config`] is built at startup (TOML file, then command-line
//! overrides), validated, wrapped in an `Arc` and handed to every component.
//! Nothing changes it afterwards.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! document_root = "www"
//!
//! [cgi]
//! interpreter = "/usr/bin/php-cgi"
//! timeout_secs = 30
//!
//! [database]
//! path = "webgate.db"
//!
//! [auth]
//! username = "admin"
//! password = "admin123"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::Credentials;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub listen: String,

    /// Directory static files and CGI scripts are served from.
    pub document_root: PathBuf,

    /// Largest request the framing layer will buffer.
    pub max_request_bytes: usize,

    /// How long a connection may take to deliver its request.
    pub read_timeout_secs: u64,

    pub cgi: CgiConfig,

    pub database: DatabaseConfig,

    /// API credentials; `None` leaves the API open.
    pub auth: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_owned(),
            document_root: PathBuf::from("www"),
            max_request_bytes: 8 * 1024 * 1024,
            read_timeout_secs: 30,
            cgi: CgiConfig::default(),
            database: DatabaseConfig::default(),
            auth: None,
        }
    }
}

/// CGI interpreter settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CgiConfig {
    pub interpreter: PathBuf,
    pub timeout_secs: u64,
}

impl Default for CgiConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("/usr/bin/php-cgi"),
            timeout_secs: 30,
        }
    }
}

impl CgiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Database settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file; `:memory:` for a throwaway database.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("webgate.db"),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without validating.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks value ranges, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.listen.trim().is_empty() {
            errors.push("listen must not be empty".to_owned());
        }
        if self.max_request_bytes == 0 {
            errors.push("max_request_bytes must be greater than 0".to_owned());
        }
        if self.read_timeout_secs == 0 {
            errors.push("read_timeout_secs must be greater than 0".to_owned());
        }
        if self.cgi.timeout_secs == 0 {
            errors.push("cgi.timeout_secs must be greater than 0".to_owned());
        }
        if let Some(auth) = &self.auth {
            if auth.username.is_empty() || auth.password.is_empty() {
                errors.push("auth.username and auth.password must both be set".to_owned());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
