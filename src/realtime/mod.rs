//! Real-time communication — WebSocket upgrade and the chat relay core.
//!
//! This module is the heart of the crate:
//!
//! - [`upgrade_response`] completes the RFC 6455 opening handshake for a
//!   parsed HTTP request.
//! - [`registry`] tracks the live connections and fans broadcasts out.
//! - [`relay`] is the control task that owns all protocol state.
//! - [`session`] drives one upgraded connection through its lifecycle.
//!
//! Ordering is exactly as strong as the pipeline makes it: messages are
//! broadcast in save-completion order, which across connections is not
//! submission order (see [`crate::background`]).

use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::background::DEFAULT_WORKERS;
use crate::http::{Request, Response};

pub mod registry;
pub mod relay;
pub mod session;

pub use registry::{ConnectionId, ConnectionRegistry, Transport};
pub use relay::{Relay, RelayCommand, RelayError, RelayHandle};
pub use session::WsStream;

/// Default TCP listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8888";

/// Default upgrade path for the realtime endpoint.
pub const DEFAULT_REALTIME_PATH: &str = "/websocket";

/// Tunables for a relay deployment.
///
/// Plain data with sensible defaults; override fields with the builder
/// methods or struct update syntax.
///
/// # Examples
///
/// ```
/// use rtchat::realtime::RelayConfig;
///
/// let config = RelayConfig::default().realtime_path("/chat").workers(4);
/// assert_eq!(config.addr, "0.0.0.0:8888");
/// assert_eq!(config.realtime_path, "/chat");
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the TCP listener binds to.
    pub addr: String,
    /// Request path that upgrades to WebSocket; everything else falls
    /// through to the fallback handler.
    pub realtime_path: String,
    /// Worker threads available for blocking save calls.
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_owned(),
            realtime_path: DEFAULT_REALTIME_PATH.to_owned(),
            workers: DEFAULT_WORKERS,
        }
    }
}

impl RelayConfig {
    /// Sets the listen address.
    #[must_use]
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Sets the upgrade path.
    #[must_use]
    pub fn realtime_path(mut self, path: impl Into<String>) -> Self {
        self.realtime_path = path.into();
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Errors classifying a request that reached the realtime path but cannot
/// be upgraded.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("request is not a well-formed websocket upgrade")]
    NotAnUpgrade,
}

/// Builds the `101 Switching Protocols` reply for a WebSocket opening
/// handshake, deriving `Sec-WebSocket-Accept` from the client's key.
///
/// # Errors
///
/// Returns [`UpgradeError::NotAnUpgrade`] if the request is missing any
/// part of the RFC 6455 §4.2.1 handshake (method, headers, key, version).
pub fn upgrade_response(request: &Request) -> Result<Response, UpgradeError> {
    if !request.is_websocket_upgrade() {
        return Err(UpgradeError::NotAnUpgrade);
    }
    let key = request.websocket_key().ok_or(UpgradeError::NotAnUpgrade)?;
    Ok(Response::switching_protocols(derive_accept_key(
        key.as_bytes(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_the_rfc6455_sample_accept_key() {
        let raw = b"GET /websocket HTTP/1.1\r\n\
            Host: localhost\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();

        let response = upgrade_response(&request).unwrap();
        let wire = String::from_utf8(response.into_bytes().to_vec()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        // The worked example from RFC 6455 §1.3.
        assert!(wire.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn plain_request_is_rejected() {
        let raw = b"GET /websocket HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert!(matches!(
            upgrade_response(&request),
            Err(UpgradeError::NotAnUpgrade)
        ));
    }
}
