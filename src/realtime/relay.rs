//! The relay control task — single owner of all protocol state.
//!
//! [`Relay::run`] is an actor loop: sessions talk to it through a
//! [`RelayHandle`], and the background dispatcher delivers save
//! completions to it over its completion channel. Because the loop
//! processes one command or completion at a time, registry membership and
//! broadcast order need no locks — serialization is by construction, not
//! convention.
//!
//! The message pipeline: an inbound text submits a blocking
//! [`RecordStore::save`] to the worker pool; when the save completes, the
//! completion runs here, formats `Client <identity>: <content>`, and
//! broadcasts it to every live connection — including the sender, and
//! including the case where the sender has since disconnected (the
//! payload then simply reaches whoever remains).

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::background::{Completion, Dispatcher};
use crate::storage::RecordStore;

use super::registry::{ConnectionId, ConnectionRegistry, Transport};

/// Commands sessions send to the control task.
#[derive(Debug)]
pub enum RelayCommand {
    /// A connection finished its handshake and wants an identity.
    Open {
        /// Sender half of the connection's outbound queue.
        transport: Transport,
        /// Resolved with the minted identity once registration lands.
        ready: oneshot::Sender<ConnectionId>,
    },
    /// A registered connection received a text frame.
    Inbound {
        identity: ConnectionId,
        content: String,
    },
    /// A connection closed or failed; remove it from the live set.
    Close { identity: ConnectionId },
}

/// Errors surfaced to sessions interacting with the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay control task is no longer running")]
    Closed,
}

/// Clonable handle for talking to the relay control task.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Registers a connection and waits for its identity.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] if the control task has stopped.
    pub async fn open(&self, transport: Transport) -> Result<ConnectionId, RelayError> {
        let (ready, minted) = oneshot::channel();
        self.commands
            .send(RelayCommand::Open { transport, ready })
            .map_err(|_| RelayError::Closed)?;
        minted.await.map_err(|_| RelayError::Closed)
    }

    /// Submits one inbound message from a registered connection.
    ///
    /// Fire-and-forget: if the control task is gone the message is
    /// dropped, and the session will notice on its next interaction.
    pub fn inbound(&self, identity: ConnectionId, content: impl Into<String>) {
        let _ = self.commands.send(RelayCommand::Inbound {
            identity,
            content: content.into(),
        });
    }

    /// Signals that a connection has closed. Safe to send more than once.
    pub fn close(&self, identity: ConnectionId) {
        let _ = self.commands.send(RelayCommand::Close { identity });
    }
}

// Everything the control task owns. Completions mutate this directly.
struct RelayState {
    registry: ConnectionRegistry,
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher<RelayState>,
}

/// The relay: registry + worker pool + store handle behind one task.
///
/// Construct with [`Relay::new`], then drive it with [`Relay::run`]
/// (typically via `tokio::spawn`). The relay stops when every
/// [`RelayHandle`] has been dropped.
pub struct Relay {
    state: RelayState,
    commands: mpsc::UnboundedReceiver<RelayCommand>,
    completions: mpsc::UnboundedReceiver<Completion<RelayState>>,
}

impl Relay {
    /// Creates a relay persisting to `store`, with `workers` background
    /// threads for save calls.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if the worker pool cannot be spawned.
    pub fn new(
        store: Arc<dyn RecordStore>,
        workers: usize,
    ) -> io::Result<(Self, RelayHandle)> {
        let (dispatcher, completions) = Dispatcher::spawn(workers)?;
        let (command_tx, commands) = mpsc::unbounded_channel();

        let relay = Self {
            state: RelayState {
                registry: ConnectionRegistry::new(),
                store,
                dispatcher,
            },
            commands,
            completions,
        };
        Ok((relay, RelayHandle {
            commands: command_tx,
        }))
    }

    /// Runs the control loop until every handle is dropped.
    ///
    /// All registry mutation and every save completion happens inside
    /// this loop, one at a time.
    pub async fn run(self) {
        let Self {
            mut state,
            mut commands,
            mut completions,
        } = self;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => state.handle(command),
                    None => break, // all handles dropped: shutdown
                },
                Some(completion) = completions.recv() => completion(&mut state),
            }
        }
        info!("relay control task stopped");
    }
}

impl RelayState {
    fn handle(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Open { transport, ready } => {
                let identity = self.registry.register(transport);
                if ready.send(identity).is_err() {
                    // The session gave up before registration landed.
                    self.registry.unregister(identity);
                }
            }
            RelayCommand::Inbound { identity, content } => self.accept(identity, content),
            RelayCommand::Close { identity } => self.registry.unregister(identity),
        }
    }

    // Submit the save; broadcast on completion. The message itself is not
    // retained here — it lives in the closure until the round-trip ends.
    fn accept(&mut self, identity: ConnectionId, content: String) {
        let store = Arc::clone(&self.store);
        self.dispatcher.submit(
            move || store.save(&content),
            move |state: &mut RelayState, result| match result {
                Ok(saved) => {
                    let payload = format!("Client {identity}: {}", saved.content);
                    state.registry.broadcast(&payload);
                }
                Err(error) => {
                    // Explicit simplification: no retry, no notice to the
                    // sender. The message is gone.
                    warn!(%identity, %error, "save failed — message dropped");
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PersistedMessage, StoreError};
    use std::time::Duration;

    // Store double that fails any content starting with '!' and delays
    // contents starting with '~'.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryStore,
    }

    impl RecordStore for ScriptedStore {
        fn save(&self, content: &str) -> Result<PersistedMessage, StoreError> {
            if let Some(rest) = content.strip_prefix('!') {
                return Err(StoreError::Io(io::Error::other(format!(
                    "store rejected {rest:?}"
                ))));
            }
            if let Some(rest) = content.strip_prefix('~') {
                std::thread::sleep(Duration::from_millis(100));
                return self.inner.save(rest);
            }
            self.inner.save(content)
        }
    }

    fn start(store: Arc<dyn RecordStore>, workers: usize) -> RelayHandle {
        let (relay, handle) = Relay::new(store, workers).unwrap();
        tokio::spawn(relay.run());
        handle
    }

    #[tokio::test]
    async fn accepted_messages_reach_every_live_connection() {
        let store = Arc::new(MemoryStore::new());
        let handle = start(store.clone(), 2);

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let c1 = handle.open(tx1).await.unwrap();
        assert_eq!(c1.get(), 1);

        handle.inbound(c1, "hello");
        assert_eq!(rx1.recv().await.unwrap(), "Client 1: hello");

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c2 = handle.open(tx2).await.unwrap();
        assert_eq!(c2.get(), 2);

        // Echo-to-all: the sender hears its own message too.
        handle.inbound(c1, "hi again");
        assert_eq!(rx1.recv().await.unwrap(), "Client 1: hi again");
        assert_eq!(rx2.recv().await.unwrap(), "Client 1: hi again");

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn in_flight_save_broadcasts_to_whoever_remains() {
        let handle = start(Arc::new(ScriptedStore::default()), 2);

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = handle.open(tx1).await.unwrap();
        let _c2 = handle.open(tx2).await.unwrap();

        // The save takes ~100ms; the disconnect lands first.
        handle.inbound(c1, "~parting words");
        handle.close(c1);

        assert_eq!(rx2.recv().await.unwrap(), "Client 1: parting words");
        // C1 was unregistered before the broadcast: its queue just closes.
        assert_eq!(rx1.recv().await, None);
    }

    #[tokio::test]
    async fn failed_save_is_dropped_and_connections_stay_live() {
        // One worker keeps save completion order deterministic.
        let handle = start(Arc::new(ScriptedStore::default()), 1);

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let c1 = handle.open(tx1).await.unwrap();

        handle.inbound(c1, "!doomed");
        handle.inbound(c1, "fine");

        // The failed message produced no broadcast; the next one did, and
        // the connection is still registered to receive it.
        assert_eq!(rx1.recv().await.unwrap(), "Client 1: fine");
    }

    #[tokio::test]
    async fn identities_keep_increasing_after_disconnects() {
        let handle = start(Arc::new(MemoryStore::new()), 1);

        let (tx1, _rx1) = mpsc::unbounded_channel();
        let c1 = handle.open(tx1).await.unwrap();
        handle.close(c1);

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let c2 = handle.open(tx2).await.unwrap();
        assert!(c2 > c1);
    }
}
