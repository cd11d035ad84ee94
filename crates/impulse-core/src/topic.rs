//! Topic abstraction for Impulse.
//!
//! Topics are named broadcast groups holding the handles of their
//! subscribers.

use crate::connection::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maximum topic name length.
pub const MAX_TOPIC_NAME_LENGTH: usize = 256;

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err("Topic name too long");
    }
    if name.starts_with('$') {
        return Err("Topic names starting with '$' are reserved");
    }
    if name.chars().any(char::is_control) {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

/// A named set of subscribers.
pub struct Topic {
    name: String,
    subscribers: HashMap<ConnectionId, Arc<dyn ConnectionHandle>>,
}

impl Topic {
    /// Create an empty topic.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashMap::new(),
        }
    }

    /// Get the topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, id: ConnectionId) -> bool {
        self.subscribers.contains_key(&id)
    }

    /// Subscribe a connection.
    ///
    /// Returns `true` if the connection was not subscribed before.
    pub fn subscribe(&mut self, handle: Arc<dyn ConnectionHandle>) -> bool {
        let id = handle.id();
        let added = self.subscribers.insert(id, handle).is_none();
        if added {
            debug!(topic = %self.name, connection = %id, "Connection subscribed");
        }
        added
    }

    /// Unsubscribe a connection.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, id: ConnectionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(topic = %self.name, connection = %id, "Connection unsubscribed");
        }
        removed
    }

    /// Snapshot of the current subscribers, safe to iterate without holding
    /// the topic.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn ConnectionHandle>> {
        self.subscribers.values().cloned().collect()
    }

    /// Get all subscriber IDs.
    #[must_use]
    pub fn subscriber_ids(&self) -> Vec<ConnectionId> {
        self.subscribers.keys().copied().collect()
    }

    /// Check if the topic has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
