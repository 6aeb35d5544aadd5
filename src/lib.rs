//! # rtchat
//!
//! A from-scratch real-time chat relay server written in Rust.
//!
//! Clients connect over WebSocket, send text messages, and receive a
//! broadcast of every message the server accepts — each message is
//! durably recorded before it is distributed. A single control task owns
//! all protocol state; blocking persistence runs on a bounded worker
//! pool and reports back through completion callbacks, so nothing ever
//! stalls the connection-handling path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rtchat::http::{Response, StatusCode};
//! use rtchat::realtime::{Relay, RelayConfig};
//! use rtchat::server::Server;
//! use rtchat::storage::JsonlStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::default();
//!     let store = Arc::new(JsonlStore::open("messages.jsonl")?);
//!
//!     let (relay, handle) = Relay::new(store, config.workers)?;
//!     tokio::spawn(relay.run());
//!
//!     let server = Server::bind(&config.addr).await?;
//!     println!("Chat relay on ws://{}{}", server.local_addr(), config.realtime_path);
//!     server.serve(config.realtime_path, handle, |_req| async {
//!         Response::new(StatusCode::NotFound).body("try the /websocket endpoint")
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod http;
pub mod realtime;
pub mod server;
pub mod storage;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use realtime::{ConnectionId, Relay, RelayConfig, RelayHandle};
pub use server::{Server, ServerError};
pub use storage::{PersistedMessage, RecordStore, StoreError};
