//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and splits traffic two ways: requests to the
//! realtime path are upgraded to WebSocket and handed to the relay;
//! everything else is dispatched to a fallback request/response handler,
//! with HTTP/1.1 persistent connections (keep-alive) out of the box.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::realtime::{self, RelayHandle, session};

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

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The rtchat server.
///
/// Binds to a TCP address, upgrades realtime-path requests to WebSocket
/// sessions on the given relay, and dispatches every other HTTP/1.1
/// request to a fallback handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rtchat::http::{Response, StatusCode};
/// use rtchat::realtime::{Relay, RelayConfig};
/// use rtchat::server::Server;
/// use rtchat::storage::MemoryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RelayConfig::default();
///     let (relay, handle) = Relay::new(Arc::new(MemoryStore::new()), config.workers)?;
///     tokio::spawn(relay.run());
///
///     let server = Server::bind(&config.addr).await?;
///     server.serve(config.realtime_path, handle, |_req| async {
///         Response::new(StatusCode::NotFound).body("try the /websocket endpoint")
///     }).await?;
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

    /// Starts accepting connections.
    ///
    /// Requests whose path equals `realtime_path` and that carry a valid
    /// WebSocket handshake are upgraded and driven as relay sessions on
    /// `relay`; the connection then belongs to the session until it
    /// closes. Every other request is dispatched to `fallback`, which is
    /// wrapped in an [`Arc`] and shared across all spawned Tokio tasks,
    /// so it must be `Send + Sync + 'static`.
    ///
    /// This method runs until the process is terminated or an
    /// unrecoverable listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve<H, F>(
        self,
        realtime_path: impl Into<String>,
        relay: RelayHandle,
        fallback: H,
    ) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(fallback);
        let realtime_path: Arc<str> = realtime_path.into().into();
        info!(
            address = %self.local_addr,
            realtime_path = %realtime_path,
            "rtchat listening"
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
            let handler = Arc::clone(&handler);
            let realtime_path = Arc::clone(&realtime_path);
            let relay = relay.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer_addr, &realtime_path, relay, handler).await
                {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection, signals
/// `Connection: close`, or upgrades to WebSocket — at which point the
/// stream is handed to the relay session for the rest of its life.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    realtime_path: &str,
    relay: RelayHandle,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large — sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // Attempt to parse the buffered data as an HTTP request.
        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received — read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        if request.path() == realtime_path {
            match realtime::upgrade_response(&request) {
                Ok(response) => {
                    stream.write_all(&response.into_bytes()).await?;
                    stream.flush().await?;

                    // Anything the client sent past the handshake is the
                    // start of its frame stream; carry it over.
                    let _ = buf.split_to(total_needed);
                    let ws = WebSocketStream::from_partially_read(
                        stream,
                        buf.to_vec(),
                        Role::Server,
                        None,
                    )
                    .await;

                    debug!(peer = %peer_addr, "websocket upgrade complete");
                    session::drive(ws, relay).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "rejecting request to realtime path");
                    let response = Response::new(StatusCode::UpgradeRequired)
                        .header("Upgrade", "websocket")
                        .body("This endpoint only speaks WebSocket")
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    break;
                }
            }
        }

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await;
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}
