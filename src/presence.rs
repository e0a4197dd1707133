//! Presence registry — who is connected, as whom, and in which rooms.
//!
//! DESIGN
//! ======
//! One `RwLock` guards a single inner struct holding both directions of the
//! connection⇄room index, so every mutation is atomic with respect to every
//! other and the two sides can never disagree. Rooms exist implicitly: they
//! appear on first join and vanish when their member set empties.
//!
//! Each connection entry carries the sender half of that connection's
//! outbound channel; the router snapshots these for fanout. The registry is
//! an explicit dependency passed via `AppState`, never a global.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::event::ServerEvent;

/// Opaque identifier for one live transport session.
pub type ConnId = Uuid;

/// Identity resolved by the token verifier, cached on the connection for
/// its whole life — never re-validated mid-connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub username: String,
    pub role: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// Registering a connection id twice is a programming error, not a
    /// client-visible condition.
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnId),
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnId),
}

struct ConnectionEntry {
    user: UserIdentity,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnId>>,
}

/// What `unregister` found and removed.
#[derive(Debug)]
pub struct Unregistered {
    pub user_id: i64,
    /// True if this was the user's last live connection.
    pub last_for_user: bool,
    /// Rooms the connection was removed from.
    pub rooms: Vec<String>,
}

/// Shared, lock-disciplined registry of live connections.
#[derive(Clone, Default)]
pub struct Presence {
    inner: Arc<RwLock<Registry>>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection.
    ///
    /// Returns `true` if this is the user's first live connection (the
    /// caller broadcasts `user_online` only then).
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::DuplicateConnection`] if the id is already
    /// registered — a consistency violation, surfaced for diagnostics only.
    pub async fn register(
        &self,
        conn_id: ConnId,
        user: UserIdentity,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<bool, PresenceError> {
        let mut reg = self.inner.write().await;
        if reg.connections.contains_key(&conn_id) {
            return Err(PresenceError::DuplicateConnection(conn_id));
        }
        let first_for_user = !reg.connections.values().any(|c| c.user.id == user.id);
        reg.connections
            .insert(conn_id, ConnectionEntry { user, tx, rooms: HashSet::new() });
        Ok(first_for_user)
    }

    /// Add the connection to a room. Idempotent: joining twice is a no-op.
    ///
    /// Returns `true` if the connection was newly added.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::UnknownConnection`] for an unregistered id.
    pub async fn join(&self, conn_id: ConnId, room: &str) -> Result<bool, PresenceError> {
        let mut reg = self.inner.write().await;
        let entry = reg
            .connections
            .get_mut(&conn_id)
            .ok_or(PresenceError::UnknownConnection(conn_id))?;
        if !entry.rooms.insert(room.to_string()) {
            return Ok(false);
        }
        reg.rooms.entry(room.to_string()).or_default().insert(conn_id);
        Ok(true)
    }

    /// Remove the connection from a room. Idempotent: leaving a room the
    /// connection is not in is a no-op.
    ///
    /// Returns `true` if the connection was actually a member.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::UnknownConnection`] for an unregistered id.
    pub async fn leave(&self, conn_id: ConnId, room: &str) -> Result<bool, PresenceError> {
        let mut reg = self.inner.write().await;
        let entry = reg
            .connections
            .get_mut(&conn_id)
            .ok_or(PresenceError::UnknownConnection(conn_id))?;
        if !entry.rooms.remove(room) {
            return Ok(false);
        }
        remove_member(&mut reg.rooms, room, conn_id);
        Ok(true)
    }

    /// Drop the connection and remove it from every room it joined.
    ///
    /// Returns `None` if the connection was never registered (or already
    /// unregistered) so the caller can decide whether to emit an offline
    /// event.
    pub async fn unregister(&self, conn_id: ConnId) -> Option<Unregistered> {
        let mut reg = self.inner.write().await;
        let entry = reg.connections.remove(&conn_id)?;
        let mut rooms: Vec<String> = entry.rooms.into_iter().collect();
        rooms.sort_unstable();
        for room in &rooms {
            remove_member(&mut reg.rooms, room, conn_id);
        }
        let last_for_user = !reg.connections.values().any(|c| c.user.id == entry.user.id);
        Some(Unregistered { user_id: entry.user.id, last_for_user, rooms })
    }

    /// Snapshot of connection ids currently in a room.
    pub async fn members_of(&self, room: &str) -> Vec<ConnId> {
        let reg = self.inner.read().await;
        reg.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection currently belongs to.
    pub async fn rooms_of(&self, conn_id: ConnId) -> Vec<String> {
        let reg = self.inner.read().await;
        reg.connections
            .get(&conn_id)
            .map(|entry| {
                let mut rooms: Vec<String> = entry.rooms.iter().cloned().collect();
                rooms.sort_unstable();
                rooms
            })
            .unwrap_or_default()
    }

    pub async fn is_member(&self, conn_id: ConnId, room: &str) -> bool {
        let reg = self.inner.read().await;
        reg.connections
            .get(&conn_id)
            .is_some_and(|entry| entry.rooms.contains(room))
    }

    /// Identity cached on the connection at registration.
    pub async fn identity_of(&self, conn_id: ConnId) -> Option<UserIdentity> {
        let reg = self.inner.read().await;
        reg.connections.get(&conn_id).map(|entry| entry.user.clone())
    }

    /// Whether the user has any live connection.
    pub async fn user_online(&self, user_id: i64) -> bool {
        let reg = self.inner.read().await;
        reg.connections.values().any(|c| c.user.id == user_id)
    }

    /// Outbound senders for every member of a room, optionally excluding one
    /// connection. The snapshot reflects a single consistent point in time.
    pub(crate) async fn room_senders(
        &self,
        room: &str,
        exclude: Option<ConnId>,
    ) -> Vec<(ConnId, mpsc::Sender<ServerEvent>)> {
        let reg = self.inner.read().await;
        let Some(members) = reg.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|id| exclude != Some(**id))
            .filter_map(|id| reg.connections.get(id).map(|entry| (*id, entry.tx.clone())))
            .collect()
    }

    /// Outbound senders for every live connection of one user (multi-device).
    pub(crate) async fn user_senders(&self, user_id: i64) -> Vec<(ConnId, mpsc::Sender<ServerEvent>)> {
        let reg = self.inner.read().await;
        reg.connections
            .iter()
            .filter(|(_, entry)| entry.user.id == user_id)
            .map(|(id, entry)| (*id, entry.tx.clone()))
            .collect()
    }

    /// Outbound senders for every registered connection.
    pub(crate) async fn all_senders(&self) -> Vec<(ConnId, mpsc::Sender<ServerEvent>)> {
        let reg = self.inner.read().await;
        reg.connections
            .iter()
            .map(|(id, entry)| (*id, entry.tx.clone()))
            .collect()
    }
}

fn remove_member(rooms: &mut HashMap<String, HashSet<ConnId>>, room: &str, conn_id: ConnId) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(&conn_id);
        // Rooms live only as long as their member set.
        if members.is_empty() {
            rooms.remove(room);
        }
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
