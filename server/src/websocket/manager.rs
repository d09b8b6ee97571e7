//! WebSocket connection manager.
//!
//! Tracks active watch sockets and the forwarding task behind every watch
//! they hold.

use std::collections::HashMap;
use std::sync::Arc;

use armory_engine::store::WatchId;
use armory_engine::wire::ServerMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Who opened it, for logs
    pub client: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    /// Forwarding task of each open watch
    watches: HashMap<WatchId, JoinHandle<()>>,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, client: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            client,
            sender,
            watches: HashMap::new(),
        };
        self.connections.insert(conn_id.clone(), connection);

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection, stopping its forwarders.
    ///
    /// Returns the ids of the watches it still held so the caller can close
    /// them in the store.
    pub fn unregister(&self, conn_id: &str) -> Vec<WatchId> {
        let Some((_, conn)) = self.connections.remove(conn_id) else {
            return Vec::new();
        };

        let mut released = Vec::with_capacity(conn.watches.len());
        for (watch_id, forwarder) in conn.watches {
            forwarder.abort();
            released.push(watch_id);
        }

        tracing::info!(
            conn_id = %conn.id,
            client = %conn.client,
            watches = released.len(),
            "WebSocket connection unregistered"
        );

        released
    }

    /// A clone of the connection's outgoing channel.
    pub fn sender(&self, conn_id: &str) -> Option<MessageSender> {
        self.connections.get(conn_id).map(|c| c.sender.clone())
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Attach a watch forwarder to a connection.
    ///
    /// If the connection is already gone the forwarder is aborted and
    /// `false` is returned.
    pub fn track_watch(&self, conn_id: &str, watch_id: WatchId, forwarder: JoinHandle<()>) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.watches.insert(watch_id, forwarder);
                true
            }
            None => {
                forwarder.abort();
                false
            }
        }
    }

    /// Stop a watch's forwarder. Returns whether the connection held it.
    pub fn release_watch(&self, conn_id: &str, watch_id: &str) -> bool {
        let forwarder = self
            .connections
            .get_mut(conn_id)
            .and_then(|mut conn| conn.watches.remove(watch_id));
        match forwarder {
            Some(forwarder) => {
                forwarder.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping of a watch whose forwarder already ended.
    pub fn forget_watch(&self, conn_id: &str, watch_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(conn_id) {
            conn.watches.remove(watch_id);
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of watches held across all connections.
    pub fn watch_count(&self) -> usize {
        self.connections.iter().map(|c| c.watches.len()).sum()
    }
}
