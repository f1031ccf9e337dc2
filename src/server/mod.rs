//! Async TCP connection engine using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 request heads, and hands each
//! request event to a [`Dispatcher`]. Supports HTTP/1.1 persistent connections
//! (keep-alive) out of the box. If the peer goes away before the response is
//! finalized, the in-flight dispatch is abandoned.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use bytes::BytesMut;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::app::Dispatcher;
use crate::http::{IncomingRequest, OutgoingResponse, StatusCode, request::RequestError};

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

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Connection engine limits.
///
/// Deserializable so it can be loaded from whatever configuration source the
/// application uses; missing fields take their defaults.
///
/// # Examples
///
/// ```
/// use rexpress::server::ServerConfig;
///
/// let config = ServerConfig::default().max_request_size(64 * 1024);
/// assert_eq!(config.initial_buffer_size, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest request (head plus body) buffered before answering `413`.
    pub max_request_size: usize,
    /// Initial read buffer capacity per connection.
    pub initial_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_size: MAX_REQUEST_SIZE,
            initial_buffer_size: INITIAL_BUF_SIZE,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    #[must_use]
    pub fn initial_buffer_size(mut self, bytes: usize) -> Self {
        self.initial_buffer_size = bytes;
        self
    }
}

/// The rexpress connection engine.
///
/// Binds to a TCP address and feeds incoming HTTP/1.1 requests to a
/// [`Dispatcher`]. Most applications use [`App::listen`](crate::App::listen)
/// instead of driving a `Server` directly.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
}

impl Server {
    /// Binds the server to the given TCP address with default limits.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        Self::bind_with(addr, ServerConfig::default()).await
    }

    /// Binds the server to the given TCP address with explicit limits.
    pub async fn bind_with(addr: impl AsRef<str>, config: ServerConfig) -> Result<Self, ServerError> {
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
            config,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches their requests until `shutdown` resolves.
    ///
    /// Each connection runs in its own Tokio task. Connections already accepted
    /// when `shutdown` fires are left to finish on their own.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_until(
        self,
        dispatcher: Dispatcher,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        let dispatcher = Arc::new(dispatcher);
        let config = Arc::new(self.config);
        let mut shutdown = pin!(shutdown);
        info!(address = %self.local_addr, "rexpress listening");

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "rexpress closed");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let dispatcher = Arc::clone(&dispatcher);
            let config = Arc::clone(&config);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, dispatcher, config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(config.initial_buffer_size);

    loop {
        // Parse whatever is already buffered before reading more; pipelined
        // requests may be waiting.
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            IncomingRequest::parse(&buf)
        };

        let (request, body_offset) = match parsed {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if !read_more(&mut stream, &mut buf, &config, peer_addr).await? {
                    break;
                }
                continue;
            }
            Err(RequestError::ContentLengthTooLarge { length }) => {
                warn!(peer = %peer_addr, length, "declared body too large — sending 413");
                send_too_large(&mut stream).await?;
                break;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = OutgoingResponse::new(StatusCode::BAD_REQUEST)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(format!("Bad Request: {e}"));
                stream.write_all(&response.into_bytes(false)).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set. `parse`
        // has already rejected lengths whose sum would overflow.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset.saturating_add(content_length);
        if total_needed > config.max_request_size {
            warn!(peer = %peer_addr, content_length, "declared body too large — sending 413");
            send_too_large(&mut stream).await?;
            break;
        }
        if buf.len() < total_needed {
            if !read_more(&mut stream, &mut buf, &config, peer_addr).await? {
                break;
            }
            continue;
        }

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        // Keep watching the socket while the chain runs so a vanished peer
        // abandons the dispatch instead of leaving it running.
        let mut exchange = pin!(dispatcher.handle(request, peer_addr));
        let outgoing = loop {
            tokio::select! {
                outgoing = &mut exchange => break outgoing,
                read = stream.read_buf(&mut buf) => {
                    if read? == 0 {
                        debug!(peer = %peer_addr, "peer closed before the response was finalized, abandoning dispatch");
                        return Ok(());
                    }
                    if buf.len() > config.max_request_size {
                        warn!(peer = %peer_addr, "too much data while dispatching — sending 413");
                        send_too_large(&mut stream).await?;
                        return Ok(());
                    }
                }
            }
        };

        let Some(response) = outgoing else {
            warn!(peer = %peer_addr, "no response was produced — closing connection");
            break;
        };

        stream.write_all(&response.into_bytes(keep_alive)).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}

// Reads more bytes into `buf`. Returns `false` when the connection should end.
async fn read_more(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    config: &ServerConfig,
    peer_addr: SocketAddr,
) -> Result<bool, std::io::Error> {
    if buf.len() > config.max_request_size {
        warn!(peer = %peer_addr, "request too large — sending 413");
        send_too_large(stream).await?;
        return Ok(false);
    }

    let bytes_read = stream.read_buf(buf).await?;
    if bytes_read == 0 {
        debug!(peer = %peer_addr, "connection closed by peer");
        return Ok(false);
    }
    Ok(true)
}

async fn send_too_large(stream: &mut TcpStream) -> Result<(), std::io::Error> {
    let response = OutgoingResponse::new(StatusCode::PAYLOAD_TOO_LARGE)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body("Request entity too large");
    stream.write_all(&response.into_bytes(false)).await?;
    stream.flush().await
}
