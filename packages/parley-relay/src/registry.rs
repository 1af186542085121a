//! Session registry: which user is reachable through which socket.
//!
//! One live connection per user id, last connect wins. Entries are keyed
//! both ways so a disconnect can be resolved from the connection alone,
//! and a stale connection that disconnects after being replaced never
//! removes its successor.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// What a connection's writer task receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and send as a text frame.
    Message(ServerMessage),
    /// Send a close frame and stop writing.
    Close,
}

/// Opaque handle used to push messages to one client socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: mpsc::UnboundedSender<Outbound>,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a message for this socket. Returns false if the socket's
    /// writer is gone.
    pub fn send(&self, message: impl Into<ServerMessage>) -> bool {
        self.sender.send(Outbound::Message(message.into())).is_ok()
    }

    /// Ask the writer to close the socket.
    pub fn close(&self) -> bool {
        self.sender.send(Outbound::Close).is_ok()
    }

    /// Two handles are the same connection iff their ids match.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }
}

/// In-memory user id → connection map.
///
/// Each DashMap shard is locked for the duration of a single mutation, so
/// `register` and `unregister` are mutually exclusive per key.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_user: DashMap<String, ConnectionHandle>,
    by_connection: DashMap<Uuid, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user_id`.
    ///
    /// Returns the previous handle when a *different* connection was
    /// registered for this user; that handle is now stale and the caller
    /// decides what to do with it. If the same connection was previously
    /// registered under another user id, that old entry is released.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.id();

        if let Some(previous_user) = self.by_connection.insert(connection_id, user_id.to_string()) {
            if previous_user != user_id {
                self.by_user
                    .remove_if(&previous_user, |_, existing| existing.id() == connection_id);
                tracing::debug!(
                    from = previous_user.as_str(),
                    to = user_id,
                    "Connection re-registered under a new user id"
                );
            }
        }

        let previous = self.by_user.insert(user_id.to_string(), handle);
        match previous {
            Some(old) if old.id() != connection_id => {
                tracing::info!(
                    user_id = user_id,
                    stale_connection = %old.id(),
                    connection = %connection_id,
                    "Registration superseded"
                );
                Some(old)
            }
            _ => {
                tracing::info!(user_id = user_id, connection = %connection_id, "Client registered");
                None
            }
        }
    }

    /// Current connection for `user_id`, if any.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.by_user.get(user_id).map(|entry| entry.value().clone())
    }

    /// Remove whatever entry this connection owns. Returns the user id
    /// that went offline, or `None` if the connection never registered or
    /// had already been superseded.
    pub fn unregister(&self, handle: &ConnectionHandle) -> Option<String> {
        let (_, user_id) = self.by_connection.remove(&handle.id())?;
        let removed = self
            .by_user
            .remove_if(&user_id, |_, existing| existing.same_connection(handle));

        if removed.is_some() {
            tracing::info!(user_id = user_id.as_str(), "Client unregistered");
            Some(user_id)
        } else {
            tracing::debug!(
                user_id = user_id.as_str(),
                connection = %handle.id(),
                "Stale connection closed; newer registration kept"
            );
            None
        }
    }

    /// The user id this connection is registered as, if it is still live.
    pub fn identity_of(&self, handle: &ConnectionHandle) -> Option<String> {
        let user_id = self.by_connection.get(&handle.id())?.value().clone();
        let live = self
            .by_user
            .get(&user_id)
            .map(|entry| entry.value().same_connection(handle))
            .unwrap_or(false);
        live.then_some(user_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.by_user.len()
    }

    /// Snapshot of every live connection except `exclude`.
    pub fn others(&self, exclude: &str) -> Vec<ConnectionHandle> {
        self.by_user
            .iter()
            .filter(|entry| entry.key() != exclude)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
