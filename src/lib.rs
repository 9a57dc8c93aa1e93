//! # webgate
//!
//! A small single-process HTTP/1.1 server: static files from a document root,
//! `.php` scripts through a CGI interpreter, and a generic table API at
//! `/api/db/<table>[/<id>]` backed by SQLite. One request per connection,
//! every response framed with an exact `Content-Length` and `Connection: close`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use webgate::database::{Executor, SqliteExecutor};
//! use webgate::{App, Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let database: Arc<dyn Executor> = Arc::new(SqliteExecutor::open(&config.database.path)?);
//!
//!     let app = Arc::new(App::new(Arc::clone(&config), Some(database)));
//!     let server = Server::bind(&config.listen).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run(app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod cgi;
pub mod config;
pub mod database;
pub mod http;
pub mod router;
pub mod security;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::App;
pub use config::{Config, ConfigError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::RouteDecision;
pub use server::{Server, ServerError};
