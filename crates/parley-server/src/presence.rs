//! Presence registry: which users are reachable, and through which
//! connections.
//!
//! A user is present iff at least one connection handle is registered for
//! them. Handles are kept in registration order so fan-out visits a user's
//! devices in the order they connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

/// Process-unique identifier of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of one connection. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting. Returns `false` if the event was
    /// dropped because the queue is full or the connection is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(conn = %self.id, "Dropping push for slow connection");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conn = %self.id, "Dropping push for closed connection");
                false
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    users: Arc<RwLock<HashMap<UserId, Vec<ConnectionHandle>>>>,
    next_id: Arc<AtomicU64>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle for a new connection. The returned receiver feeds
    /// the connection's writer.
    pub fn new_handle(&self, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ConnectionHandle { id, tx }, rx)
    }

    /// Add `handle` to the user's set. Registering the same handle twice is a
    /// no-op. Returns `true` if the user was offline before.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) -> bool {
        let mut users = self.users.write().await;
        let handles = users.entry(user).or_default();
        let came_online = handles.is_empty();

        if !handles.iter().any(|h| h.id == handle.id) {
            handles.push(handle);
        }

        info!(
            user = %user,
            devices = handles.len(),
            "Connection registered"
        );

        came_online
    }

    /// Remove a handle. The user's entry disappears together with its last
    /// handle. Returns `true` if the user went offline.
    pub async fn deregister(&self, user: &UserId, id: ConnectionId) -> bool {
        let mut users = self.users.write().await;
        let went_offline = if let Some(handles) = users.get_mut(user) {
            let before = handles.len();
            handles.retain(|h| h.id != id);
            if handles.len() != before {
                info!(
                    user = %user,
                    conn = %id,
                    devices = handles.len(),
                    "Connection deregistered"
                );
            }
            handles.is_empty()
        } else {
            false
        };

        if went_offline {
            users.remove(user);
        }

        went_offline
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.users.read().await.contains_key(user)
    }

    /// Point-in-time copy of every online user, sorted.
    pub async fn snapshot_online_users(&self) -> Vec<UserId> {
        let mut online: Vec<UserId> = self.users.read().await.keys().copied().collect();
        online.sort();
        online
    }

    /// The user's handles in registration order.
    pub async fn handles_for(&self, user: &UserId) -> Vec<ConnectionHandle> {
        self.users
            .read()
            .await
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// Push to every connection of `user`. Returns how many queues accepted
    /// the event.
    pub async fn push_to_user(&self, user: &UserId, event: &ServerEvent) -> usize {
        self.handles_for(user)
            .await
            .iter()
            .filter(|h| h.push(event.clone()))
            .count()
    }

    /// Push to every registered connection.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let handles: Vec<ConnectionHandle> = {
            let users = self.users.read().await;
            users.values().flatten().cloned().collect()
        };
        handles.iter().filter(|h| h.push(event.clone())).count()
    }

    pub async fn connection_count(&self) -> usize {
        self.users.read().await.values().map(Vec::len).sum()
    }
}
