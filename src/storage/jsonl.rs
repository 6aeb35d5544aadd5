//! Append-only JSON-lines record store.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::debug;

use super::{PersistedMessage, RecordStore, StoreError};

/// A [`RecordStore`] that appends one JSON object per line to a file.
///
/// Each line is a serialized [`PersistedMessage`]. Ids are sequential;
/// reopening an existing file resumes the sequence after the last record.
/// Writes are flushed before `save` returns, so an acknowledged record is
/// on its way to disk before it is broadcast.
#[derive(Debug)]
pub struct JsonlStore {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    next_id: u64,
}

impl JsonlStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read or opened for
    /// append.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let existing = match File::open(path) {
            Ok(file) => BufReader::new(file).lines().count() as u64,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!(path = %path.display(), resumed_after = existing, "jsonl store opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                next_id: existing + 1,
            }),
        })
    }
}

impl RecordStore for JsonlStore {
    fn save(&self, content: &str) -> Result<PersistedMessage, StoreError> {
        // Id assignment and the write happen under one lock so ids on disk
        // are gapless and in file order.
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let message = PersistedMessage {
            id: inner.next_id,
            content: content.to_owned(),
            timestamp: Utc::now(),
        };
        let line = serde_json::to_string(&message)?;

        writeln!(inner.file, "{line}")?;
        inner.file.flush()?;
        inner.next_id += 1;

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");

        let store = JsonlStore::open(&path).unwrap();
        store.save("hello").unwrap();
        store.save("world").unwrap();

        let lines: Vec<PersistedMessage> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].id, 1);
        assert_eq!(lines[0].content, "hello");
        assert_eq!(lines[1].id, 2);
        assert_eq!(lines[1].content, "world");
    }

    #[test]
    fn reopen_resumes_id_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            store.save("one").unwrap();
            store.save("two").unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        let resumed = store.save("three").unwrap();
        assert_eq!(resumed.id, 3);
    }

    #[test]
    fn open_on_fresh_path_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("fresh.jsonl")).unwrap();
        assert_eq!(store.save("first").unwrap().id, 1);
    }
}
