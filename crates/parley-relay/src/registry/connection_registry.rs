//! Connection Registry implementation.
//!
//! Tracks the live connection for each identity.

use std::collections::HashMap;
use std::fmt;

use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{metrics, Identity};

/// Unique identifier of one accepted connection.
///
/// Two connections claiming the same identity always have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mint a fresh connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of attempting to queue an item on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Item was queued for delivery
    Sent,
    /// The recipient is not currently registered
    NotConnected,
    /// The recipient's outbound channel is full
    ChannelFull,
    /// The recipient's outbound channel is closed
    ChannelClosed,
}

impl SendResult {
    /// Whether the item was queued.
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

/// Handle to an open connection.
///
/// Cloning a handle clones the outbound sender; all clones share one
/// [`ConnectionId`] and one eviction token.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    sender: mpsc::Sender<Value>,
    eviction: CancellationToken,
}

impl ConnectionHandle {
    /// Wrap an existing outbound sender in a new handle.
    pub fn new(identity: Identity, sender: mpsc::Sender<Value>) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            sender,
            eviction: CancellationToken::new(),
        }
    }

    /// Create a handle together with the receiving end of its channel.
    pub fn channel(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(identity, tx), rx)
    }

    /// The connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The identity this connection claimed.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether the owning session has stopped reading its channel.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Tell the owning session to close now.
    ///
    /// Bypasses the outbound queue, so it works even when the queue is
    /// full or the client has stopped reading.
    pub fn evict(&self) {
        self.eviction.cancel();
    }

    /// Whether [`evict`](Self::evict) has been called on any clone.
    pub fn is_evicted(&self) -> bool {
        self.eviction.is_cancelled()
    }

    /// Resolves once the connection is evicted.
    pub fn evicted(&self) -> WaitForCancellationFuture<'_> {
        self.eviction.cancelled()
    }

    /// Queue an item without waiting.
    ///
    /// A full or closed channel is reported, never awaited.
    pub fn try_deliver(&self, message: Value) -> SendResult {
        match self.sender.try_send(message) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::ChannelFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::ChannelClosed,
        }
    }
}

/// Registry of live connections keyed by identity.
///
/// All operations take the inner lock briefly and never across an
/// `.await`, so the registry can be shared by any number of sessions.
///
/// ## Usage
///
/// ```ignore
/// let registry = Arc::new(ConnectionRegistry::new());
///
/// // When a session becomes active:
/// let (handle, rx) = ConnectionHandle::channel(identity, 256);
/// registry.register(handle.clone());
///
/// // When routing a message:
/// let result = registry.send_to("bob", value);
///
/// // When the session ends:
/// registry.unregister(handle.identity().as_str(), handle.id());
/// ```
pub struct ConnectionRegistry {
    /// Map of identity to the connection currently claiming it
    connections: RwLock<HashMap<Identity, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under its identity.
    ///
    /// If the identity is already registered, the previous handle is
    /// replaced and returned. It is not closed: its session keeps running
    /// until it disconnects on its own, and its later `unregister` is a
    /// no-op because the ids differ.
    #[instrument(skip(self, handle), fields(identity = %handle.identity(), connection_id = %handle.id()))]
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let identity = handle.identity().clone();
        let previous = self.connections.write().insert(identity, handle);
        if let Some(previous) = &previous {
            warn!(
                displaced = %previous.id(),
                "Replaced existing registration for identity"
            );
        } else {
            metrics::connections_active().add(1, &[]);
            debug!("Registered new connection");
        }
        previous
    }

    /// Look up the connection currently registered for an identity.
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections.read().get(identity).cloned()
    }

    /// Remove an identity's entry if, and only if, it still belongs to `id`.
    ///
    /// Returns true if an entry was removed.
    #[instrument(skip(self), fields(identity = %identity, connection_id = %id))]
    pub fn unregister(&self, identity: &str, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let current = connections.get(identity).map(ConnectionHandle::id);
        match current {
            Some(current) if current == id => {
                connections.remove(identity);
                drop(connections);
                metrics::connections_active().add(-1, &[]);
                debug!("Unregistered connection");
                true
            }
            Some(current) => {
                debug!(
                    current = %current,
                    "Identity now belongs to a newer connection, leaving it registered"
                );
                false
            }
            None => {
                debug!("Connection was not registered");
                false
            }
        }
    }

    /// Check if an identity is currently registered.
    pub fn is_connected(&self, identity: &str) -> bool {
        self.connections.read().contains_key(identity)
    }

    /// Get the number of registered identities.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// List registered identities, sorted.
    ///
    /// Taken under a single read lock, so it is a consistent point-in-time
    /// view even while other sessions register and unregister.
    pub fn snapshot(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.connections.read().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Queue an item for the connection registered under `identity`.
    ///
    /// The lock is released before the item is queued. A closed channel
    /// does not remove the entry; only the owning session does that.
    #[instrument(skip(self, message), fields(to = %identity))]
    pub fn send_to(&self, identity: &str, message: Value) -> SendResult {
        let Some(handle) = self.lookup(identity) else {
            debug!("Recipient not connected");
            return SendResult::NotConnected;
        };

        let result = handle.try_deliver(message);
        match result {
            SendResult::Sent => debug!("Queued for delivery"),
            SendResult::ChannelFull => {
                warn!("Outbound channel full, dropping message");
                metrics::forward_failures().add(1, &[KeyValue::new("reason", "full")]);
            }
            SendResult::ChannelClosed => {
                debug!("Outbound channel closed, connection may have dropped");
                metrics::forward_failures().add(1, &[KeyValue::new("reason", "closed")]);
            }
            SendResult::NotConnected => {}
        }
        result
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connection_count())
            .finish()
    }
}
