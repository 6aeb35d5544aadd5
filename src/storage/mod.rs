//! Durable message storage — the record-store seam of the relay.
//!
//! The relay treats storage as an opaque append-only record store behind
//! [`RecordStore`]: one synchronous `save` call that may block on I/O and
//! may fail. The background dispatcher keeps those calls off the control
//! task, so implementations are free to block.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] — in-process vector, for tests and demos.
//! - [`JsonlStore`] — append-only JSON-lines file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Errors produced by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A message accepted into durable storage.
///
/// Immutable once created: the store assigns `id` and `timestamp`, the
/// content is the client's text verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    /// Storage-assigned sequential identifier.
    pub id: u64,
    /// The message text as submitted.
    pub content: String,
    /// When the store accepted the message.
    pub timestamp: DateTime<Utc>,
}

/// An append-only record store for chat messages.
///
/// `save` is deliberately synchronous: it runs on a background worker
/// thread (see [`crate::background::Dispatcher`]) and is allowed to block
/// for as long as the underlying medium needs. Implementations must be
/// safe to call from multiple worker threads at once.
pub trait RecordStore: Send + Sync {
    /// Appends `content` to the store, returning the persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record could not be written. The relay
    /// logs the failure and drops the message; no broadcast occurs.
    fn save(&self, content: &str) -> Result<PersistedMessage, StoreError>;
}
