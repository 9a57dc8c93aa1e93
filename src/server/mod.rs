//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and hands each one's request to the [`App`]. Every
//! connection carries exactly one request: read until the header section is
//! complete, answer, close. There are no persistent connections.
//!
//! Framing stops at the first `\r\n\r\n`; whatever body bytes arrived in the
//! same reads go along with the headers, and nothing more is waited for.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::http::request::header_boundary;
use crate::http::{Response, StatusCode};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The webgate HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use webgate::{App, Config, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let app = App::new(Arc::new(Config::default()), None);
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(Arc::new(app)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, one Tokio task per connection.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, app: Arc<App>) -> Result<(), ServerError> {
        info!(
            address = %self.local_addr,
            root = %app.config().document_root.display(),
            "webgate listening"
        );

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let app = Arc::clone(&app);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, app).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// What the framing layer collected from a connection.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// The header section is complete, or the peer stopped sending.
    Request(BytesMut),
    /// The peer closed without sending anything.
    Closed,
    /// The limit was reached before the header section ended.
    TooLarge,
}

/// Serves the single request carried by `stream`, then closes it.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    app: Arc<App>,
) -> Result<(), std::io::Error> {
    let config = app.config();
    let read_timeout: Duration = config.read_timeout();

    let frame = match tokio::time::timeout(
        read_timeout,
        read_request(&mut stream, config.max_request_bytes),
    )
    .await
    {
        Ok(frame) => frame?,
        Err(_) => {
            debug!(peer = %peer_addr, timeout = ?read_timeout, "no complete request in time");
            return Ok(());
        }
    };

    let response = match frame {
        Frame::Request(buf) => app.handle(&buf).await,
        Frame::Closed => {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(());
        }
        Frame::TooLarge => {
            warn!(peer = %peer_addr, limit = config.max_request_bytes, "request too large");
            Response::error(StatusCode::BadRequest, "Request too large")
        }
    };

    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

/// Buffers `reader` until the header terminator shows up, the peer stops
/// sending, or more than `max_bytes` are held.
async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<Frame, std::io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE.min(max_bytes));

    loop {
        let bytes_read = reader.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            // Incomplete buffers still go to the parser, which rejects them.
            return Ok(if buf.is_empty() {
                Frame::Closed
            } else {
                Frame::Request(buf)
            });
        }

        if header_boundary(&buf).is_some() {
            return Ok(Frame::Request(buf));
        }

        if buf.len() > max_bytes {
            return Ok(Frame::TooLarge);
        }
    }
}
