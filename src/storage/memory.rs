//! In-memory record store.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use super::{PersistedMessage, RecordStore, StoreError};

/// A [`RecordStore`] backed by an in-process vector.
///
/// Nothing survives the process; intended for tests, demos, and running
/// the relay without a durable backend. Ids are assigned sequentially
/// starting at 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedMessage>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records saved so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been saved.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns a snapshot of all records in save order.
    pub fn records(&self) -> Vec<PersistedMessage> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PersistedMessage>> {
        // A poisoned lock only means a worker died mid-push; the vector
        // itself is still well-formed.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryStore {
    fn save(&self, content: &str) -> Result<PersistedMessage, StoreError> {
        let mut records = self.lock();
        let message = PersistedMessage {
            id: records.len() as u64 + 1,
            content: content.to_owned(),
            timestamp: Utc::now(),
        };
        records.push(message.clone());
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_sequential_ids() {
        let store = MemoryStore::new();
        let first = store.save("hello").unwrap();
        let second = store.save("world").unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn preserves_content_verbatim() {
        let store = MemoryStore::new();
        let saved = store.save("hé llo  ").unwrap();
        assert_eq!(saved.content, "hé llo  ");
        assert_eq!(store.records()[0], saved);
    }
}
