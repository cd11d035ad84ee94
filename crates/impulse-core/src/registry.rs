//! Connection registry.
//!
//! Tracks every open connection with its liveness metadata, and the set of
//! receiver connections registered under each username. The registry owns
//! the only teardown path: closing a connection always unsubscribes it from
//! every topic, so registry and broker state cannot drift apart.

use crate::broker::TopicBroker;
use crate::connection::{
    now_millis, ConnectionHandle, ConnectionId, ConnectionInfo, Liveness, LivenessState,
};
use dashmap::DashMap;
use impulse_protocol::Role;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Username was empty.
    #[error("Username cannot be empty")]
    EmptyUsername,

    /// The connection is not open (never opened, closed, or closing).
    #[error("Connection not open: {0}")]
    NotOpen(ConnectionId),
}

/// What a registration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Sender registrations hold no state.
    Ignored,
    /// Added under the username.
    Added,
    /// Already registered under the same username.
    Unchanged,
    /// Moved from another username; its old topics were left.
    Moved {
        /// Username the connection was registered under before.
        previous: String,
    },
}

struct ConnectionEntry {
    handle: Arc<dyn ConnectionHandle>,
    remote_address: String,
    connected_at: u64,
    username: Option<String>,
    liveness: Liveness,
}

/// The connection registry.
pub struct ConnectionRegistry {
    /// Open connections.
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Receiver connections per username.
    receivers: DashMap<String, HashSet<ConnectionId>>,
    broker: Arc<TopicBroker>,
}

impl ConnectionRegistry {
    /// Create a registry that cascades teardown into `broker`.
    #[must_use]
    pub fn new(broker: Arc<TopicBroker>) -> Self {
        Self {
            connections: DashMap::new(),
            receivers: DashMap::new(),
            broker,
        }
    }

    /// Start tracking a newly opened connection.
    pub fn open(&self, handle: Arc<dyn ConnectionHandle>, remote_address: impl Into<String>) {
        let id = handle.id();
        let remote_address = remote_address.into();
        debug!(connection = %id, remote = %remote_address, "Connection opened");
        self.connections.insert(
            id,
            ConnectionEntry {
                handle,
                remote_address,
                connected_at: now_millis(),
                username: None,
                liveness: Liveness::new(),
            },
        );
    }

    /// Register a connection under a username.
    ///
    /// Only receivers are stored. Registering again under the same username
    /// is a no-op; registering under another username moves the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the username is empty or the connection is not
    /// open.
    pub fn register(
        &self,
        id: ConnectionId,
        username: &str,
        role: Role,
    ) -> Result<RegisterOutcome, RegistryError> {
        if username.is_empty() {
            warn!(connection = %id, "Ignoring registration without username");
            return Err(RegistryError::EmptyUsername);
        }
        if role == Role::Sender {
            debug!(connection = %id, username = %username, "Sender registered");
            return Ok(RegisterOutcome::Ignored);
        }

        // The entry stays locked until the receiver set is updated, so a
        // concurrent close either sees the username or finds nothing.
        let mut entry = match self.connections.get_mut(&id) {
            Some(entry) if !entry.liveness.is_closing() => entry,
            _ => {
                warn!(connection = %id, username = %username, "Registration for closed connection");
                return Err(RegistryError::NotOpen(id));
            }
        };

        let outcome = match entry.username.take() {
            Some(current) if current == username => {
                entry.username = Some(current);
                return Ok(RegisterOutcome::Unchanged);
            }
            Some(previous) => {
                self.remove_receiver(&previous, id);
                self.broker.unsubscribe_all(id);
                RegisterOutcome::Moved { previous }
            }
            None => RegisterOutcome::Added,
        };

        self.receivers
            .entry(username.to_string())
            .or_default()
            .insert(id);
        entry.username = Some(username.to_string());

        debug!(connection = %id, username = %username, "Receiver registered");
        Ok(outcome)
    }

    /// Subscribe an open connection to a relay-derived topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open.
    pub fn subscribe(&self, id: ConnectionId, topic: &str) -> Result<bool, RegistryError> {
        let entry = match self.connections.get(&id) {
            Some(entry) if !entry.liveness.is_closing() => entry,
            _ => return Err(RegistryError::NotOpen(id)),
        };
        Ok(self.broker.join(entry.handle.clone(), topic))
    }

    /// Receiver connections registered under a username.
    #[must_use]
    pub fn lookup(&self, username: &str) -> Vec<ConnectionId> {
        self.receivers
            .get(username)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Username a connection is registered under.
    #[must_use]
    pub fn username_of(&self, id: ConnectionId) -> Option<String> {
        self.connections.get(&id).and_then(|e| e.username.clone())
    }

    /// Remove a connection from its username entry and from every topic.
    ///
    /// The connection stays open. Returns `true` if it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let username = self
            .connections
            .get_mut(&id)
            .and_then(|mut entry| entry.username.take());
        self.detach(id, username.as_deref())
    }

    /// Tear a connection down: unregister it and forget it.
    ///
    /// Returns the handle if the connection was still tracked. Calling it
    /// again is a no-op.
    pub fn close(&self, id: ConnectionId) -> Option<Arc<dyn ConnectionHandle>> {
        let removed = self.connections.remove(&id);
        let username = removed.as_ref().and_then(|(_, e)| e.username.clone());
        self.detach(id, username.as_deref());

        removed.map(|(_, entry)| {
            debug!(connection = %id, "Connection closed");
            entry.handle
        })
    }

    /// Close the transport and tear the connection down.
    ///
    /// Returns `true` if the connection was still tracked.
    pub fn evict(&self, id: ConnectionId) -> bool {
        match self.close(id) {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Evict every open connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        self.ids().into_iter().filter(|id| self.evict(*id)).count()
    }

    fn detach(&self, id: ConnectionId, username: Option<&str>) -> bool {
        let registered = match username {
            Some(name) => self.remove_receiver(name, id),
            None => false,
        };
        self.broker.unsubscribe_all(id);
        if registered {
            debug!(connection = %id, username = ?username, "Receiver unregistered");
        }
        registered
    }

    fn remove_receiver(&self, username: &str, id: ConnectionId) -> bool {
        let Some(mut ids) = self.receivers.get_mut(username) else {
            return false;
        };
        let removed = ids.remove(&id);
        if ids.is_empty() {
            drop(ids);
            self.receivers.remove_if(username, |_, ids| ids.is_empty());
        }
        removed
    }

    /// Snapshot of all open connection IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Whether a connection is tracked.
    #[must_use]
    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Run `f` on a connection's liveness metadata while its entry is locked.
    ///
    /// Returns `None` if the connection is gone.
    pub fn with_liveness<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut Liveness, &Arc<dyn ConnectionHandle>) -> R,
    ) -> Option<R> {
        let mut entry = self.connections.get_mut(&id)?;
        let entry = &mut *entry;
        Some(f(&mut entry.liveness, &entry.handle))
    }

    /// Snapshot of a single connection.
    #[must_use]
    pub fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|e| Self::describe(id, &e))
    }

    /// Snapshot of every open connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|e| Self::describe(*e.key(), e.value()))
            .collect()
    }

    fn describe(id: ConnectionId, entry: &ConnectionEntry) -> ConnectionInfo {
        ConnectionInfo {
            id,
            remote_address: entry.remote_address.clone(),
            username: entry.username.clone(),
            connected_at: entry.connected_at,
            state: entry.liveness.state,
            missed_pongs: entry.liveness.missed_pongs,
            round_trip_millis: entry.liveness.round_trip_millis,
        }
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            usernames: self.receivers.len(),
            receivers: self.receivers.iter().map(|r| r.len()).sum(),
            awaiting_pong: self
                .connections
                .iter()
                .filter(|e| e.liveness.state == LivenessState::AwaitingPong)
                .count(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Open connections.
    pub connections: usize,
    /// Usernames with at least one receiver.
    pub usernames: usize,
    /// Registered receiver connections.
    pub receivers: usize,
    /// Connections pinged and not yet answered.
    pub awaiting_pong: usize,
}
