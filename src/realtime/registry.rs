//! Connection registry — the live set of chat clients.
//!
//! One registry instance owns every open connection for the lifetime of
//! the relay. It is created at server start, torn down at shutdown, and
//! mutated exclusively by the relay control task; no other component
//! touches the live set directly.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The sending half of a connection's outbound queue.
///
/// The registry only ever pushes text payloads into it; the session's
/// writer task drains the paired receiver into the WebSocket sink. When
/// the session is gone the send fails, which broadcast treats as a
/// skippable delivery failure.
pub type Transport = mpsc::UnboundedSender<String>;

/// Identity of one registered connection.
///
/// Monotonically increasing and never reused, even across disconnects: a
/// stale identity captured by an in-flight save can never collide with a
/// later connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Returns the raw identity number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// One live connection: its identity and the handle for sending to it.
#[derive(Debug)]
struct Connection {
    identity: ConnectionId,
    transport: Transport,
}

/// Insertion-ordered set of live connections.
///
/// Invariant: every identity present maps to exactly one transport that
/// was live at registration time, and an identity never reappears after
/// [`unregister`](Self::unregister).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    // Count of identities ever issued; the next registration gets this + 1.
    issued: u64,
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection, minting a fresh identity strictly
    /// greater than every identity issued before it.
    ///
    /// Pure in-memory bookkeeping — cannot fail.
    pub fn register(&mut self, transport: Transport) -> ConnectionId {
        self.issued += 1;
        let identity = ConnectionId(self.issued);
        self.connections.push(Connection {
            identity,
            transport,
        });
        debug!(%identity, live = self.connections.len(), "connection registered");
        identity
    }

    /// Removes the connection with this identity from the live set.
    ///
    /// Idempotent: unregistering an identity that is absent (already
    /// removed, or never issued) is a no-op, so duplicate close signals
    /// are harmless.
    pub fn unregister(&mut self, identity: ConnectionId) {
        let before = self.connections.len();
        self.connections.retain(|c| c.identity != identity);
        if self.connections.len() < before {
            debug!(%identity, live = self.connections.len(), "connection unregistered");
        }
    }

    /// Delivers `payload` to every live connection in registration order.
    ///
    /// Best-effort: a transport whose session has gone away is logged and
    /// skipped, and delivery continues with the remaining connections.
    pub fn broadcast(&self, payload: &str) {
        for connection in &self.connections {
            if connection.transport.send(payload.to_owned()).is_err() {
                warn!(
                    identity = %connection.identity,
                    "transport closed — skipping broadcast delivery"
                );
            }
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connections are live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Identities of live connections in registration order.
    pub fn identities(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().map(|c| c.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (Transport, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn identities_strictly_increase_across_churn() {
        let mut registry = ConnectionRegistry::new();
        let mut issued = Vec::new();

        for _ in 0..5 {
            let (tx, _rx) = transport();
            let id = registry.register(tx);
            issued.push(id);
            registry.unregister(id);
        }

        for pair in issued.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn live_set_is_registered_minus_unregistered() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, _rx1) = transport();
        let (tx2, _rx2) = transport();
        let (tx3, _rx3) = transport();

        let a = registry.register(tx1);
        let b = registry.register(tx2);
        let c = registry.register(tx3);

        registry.unregister(b);

        let live: Vec<_> = registry.identities().collect();
        assert_eq!(live, vec![a, c]);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = transport();
        let id = registry.register(tx);

        registry.unregister(id);
        registry.unregister(id); // duplicate close signal
        assert!(registry.is_empty());

        // A never-issued identity is equally harmless.
        let (tx2, _rx2) = transport();
        let id2 = registry.register(tx2);
        registry.unregister(id);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.identities().next(), Some(id2));
    }

    #[test]
    fn broadcast_reaches_every_live_connection_once() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = transport();
        let (tx2, mut rx2) = transport();

        registry.register(tx1);
        registry.register(tx2);
        registry.broadcast("hello");

        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
        // Exactly once each.
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn one_dead_transport_does_not_block_the_rest() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, rx1) = transport();
        let (tx2, mut rx2) = transport();
        let (tx3, mut rx3) = transport();

        registry.register(tx1);
        registry.register(tx2);
        registry.register(tx3);

        // First session dies without unregistering yet.
        drop(rx1);
        registry.broadcast("still delivered");

        assert_eq!(rx2.try_recv().unwrap(), "still delivered");
        assert_eq!(rx3.try_recv().unwrap(), "still delivered");
    }
}
