//! Presence tracking for Convoy.
//!
//! The registry maps each live connection to the identity behind it and keeps
//! two reverse indices (user id and user type) so audiences can be resolved
//! without scanning. All three indices live behind one lock and are only ever
//! mutated together.

use crate::message::{Outbox, Push};
use convoy_protocol::{OnlineDriver, SenderInfo, UserType};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A connection identifier, unique per transport session.
pub type ConnectionId = String;

/// A live connection and the identity registered on it.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Connection ID.
    pub id: ConnectionId,
    /// Stable logical user identity.
    pub user_id: String,
    /// Audience the user belongs to.
    pub user_type: UserType,
    /// Label shown in presence lists.
    pub display_name: String,
    outbox: Outbox,
}

impl Connection {
    /// Create a connection record.
    #[must_use]
    pub fn new(
        id: impl Into<ConnectionId>,
        user_id: impl Into<String>,
        user_type: UserType,
        display_name: impl Into<String>,
        outbox: Outbox,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            user_type,
            display_name: display_name.into(),
            outbox,
        }
    }

    /// Push a payload to this connection.
    ///
    /// Returns `false` if the transport side has already gone away.
    pub fn push(&self, payload: Arc<Push>) -> bool {
        match self.outbox.send(payload) {
            Ok(()) => true,
            Err(_) => {
                trace!(connection = %self.id, "Push dropped, connection closed");
                false
            }
        }
    }

    /// Identity of this connection as a chat sender.
    #[must_use]
    pub fn sender_info(&self) -> SenderInfo {
        SenderInfo {
            user_id: self.user_id.clone(),
            user_type: self.user_type,
            display_name: self.display_name.clone(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of distinct users with at least one connection.
    pub users: usize,
    /// Connections per user type. Types with no connections are absent.
    pub by_type: BTreeMap<UserType, usize>,
}

struct Entry {
    connection: Connection,
    last_seen: Instant,
}

#[derive(Default)]
struct Indices {
    connections: HashMap<ConnectionId, Entry>,
    by_user: HashMap<String, HashSet<ConnectionId>>,
    by_type: HashMap<UserType, HashSet<ConnectionId>>,
}

impl Indices {
    fn insert(&mut self, connection: Connection) -> Option<Connection> {
        let replaced = self.remove(&connection.id);

        self.by_user
            .entry(connection.user_id.clone())
            .or_default()
            .insert(connection.id.clone());
        self.by_type
            .entry(connection.user_type)
            .or_default()
            .insert(connection.id.clone());
        self.connections.insert(
            connection.id.clone(),
            Entry {
                connection,
                last_seen: Instant::now(),
            },
        );

        replaced
    }

    fn remove(&mut self, connection_id: &str) -> Option<Connection> {
        let entry = self.connections.remove(connection_id)?;
        let connection = entry.connection;

        if let Some(ids) = self.by_user.get_mut(&connection.user_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                self.by_user.remove(&connection.user_id);
                debug!(user = %connection.user_id, "Presence: user fully offline");
            }
        }
        if let Some(ids) = self.by_type.get_mut(&connection.user_type) {
            ids.remove(connection_id);
            if ids.is_empty() {
                self.by_type.remove(&connection.user_type);
            }
        }

        Some(connection)
    }

    fn collect(&self, ids: Option<&HashSet<ConnectionId>>) -> Vec<Connection> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.connections.get(id))
                .map(|e| e.connection.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    fn online_drivers(&self) -> Vec<OnlineDriver> {
        let mut by_user: HashMap<&str, OnlineDriver> = HashMap::new();
        for conn in self
            .by_type
            .get(&UserType::Driver)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .map(|e| &e.connection)
        {
            by_user
                .entry(conn.user_id.as_str())
                .and_modify(|d| d.connections += 1)
                .or_insert_with(|| OnlineDriver {
                    user_id: conn.user_id.clone(),
                    display_name: conn.display_name.clone(),
                    connections: 1,
                });
        }

        let mut drivers: Vec<OnlineDriver> = by_user.into_values().collect();
        drivers.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        drivers
    }

    /// Send the complete driver list to every admin connection.
    ///
    /// Called with the write lock held so admins observe lists in mutation order.
    fn publish_drivers(&self) {
        let update = Arc::new(Push::DriversUpdate(self.online_drivers()));
        let admins = self.collect(self.by_type.get(&UserType::Admin));
        for admin in &admins {
            admin.push(Arc::clone(&update));
        }
        trace!(admins = admins.len(), "Presence: drivers update published");
    }
}

/// The registry of live connections.
pub struct PresenceRegistry {
    inner: RwLock<Indices>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection, replacing any earlier record with the same ID.
    ///
    /// Driver changes publish the full online-driver list to every admin, and
    /// a registering admin receives the current list immediately.
    ///
    /// Returns `true` if the connection ID was not registered before.
    pub fn register(&self, connection: Connection) -> bool {
        let mut indices = self.write();

        let joined_type = connection.user_type;
        let admin = (joined_type == UserType::Admin).then(|| connection.clone());
        debug!(
            connection = %connection.id,
            user = %connection.user_id,
            user_type = %joined_type,
            "Presence: registered"
        );

        let replaced = indices.insert(connection);
        let is_new = replaced.is_none();

        let drivers_changed = joined_type == UserType::Driver
            || replaced.is_some_and(|old| old.user_type == UserType::Driver);
        if drivers_changed {
            indices.publish_drivers();
        } else if let Some(admin) = admin {
            admin.push(Arc::new(Push::DriversUpdate(indices.online_drivers())));
        }

        is_new
    }

    /// Remove a connection from every index.
    ///
    /// Unknown IDs are ignored, so duplicate disconnects are harmless.
    pub fn unregister(&self, connection_id: &str) -> Option<Connection> {
        let mut indices = self.write();
        let removed = indices.remove(connection_id)?;

        debug!(
            connection = %connection_id,
            user = %removed.user_id,
            "Presence: unregistered"
        );
        if removed.user_type == UserType::Driver {
            indices.publish_drivers();
        }

        Some(removed)
    }

    /// Refresh a connection's last-seen time.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn touch(&self, connection_id: &str) -> bool {
        let mut indices = self.write();
        match indices.connections.get_mut(connection_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Unregister every connection idle for at least `timeout`.
    ///
    /// Returns the evicted connection IDs.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        let mut indices = self.write();
        let stale: Vec<ConnectionId> = indices
            .connections
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let mut drivers_changed = false;
        for id in &stale {
            if let Some(conn) = indices.remove(id) {
                drivers_changed |= conn.user_type == UserType::Driver;
                debug!(connection = %id, "Presence: evicted stale connection");
            }
        }
        if drivers_changed {
            indices.publish_drivers();
        }

        stale
    }

    /// Look up a single connection.
    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        self.read()
            .connections
            .get(connection_id)
            .map(|e| e.connection.clone())
    }

    /// All connections owned by one user.
    #[must_use]
    pub fn connections_for_user(&self, user_id: &str) -> Vec<Connection> {
        let indices = self.read();
        indices.collect(indices.by_user.get(user_id))
    }

    /// All connections of one user type.
    #[must_use]
    pub fn connections_for_type(&self, user_type: UserType) -> Vec<Connection> {
        let indices = self.read();
        indices.collect(indices.by_type.get(&user_type))
    }

    /// Every registered connection.
    #[must_use]
    pub fn all_connections(&self) -> Vec<Connection> {
        self.read()
            .connections
            .values()
            .map(|e| e.connection.clone())
            .collect()
    }

    /// Whether the user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.read().by_user.contains_key(user_id)
    }

    /// Online drivers, one entry per user.
    #[must_use]
    pub fn online_drivers(&self) -> Vec<OnlineDriver> {
        self.read().online_drivers()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        let indices = self.read();
        PresenceStats {
            connections: indices.connections.len(),
            users: indices.by_user.len(),
            by_type: indices
                .by_type
                .iter()
                .map(|(t, ids)| (*t, ids.len()))
                .collect(),
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
