//! Message shapes as they appear on the wire.
//!
//! These types mirror the JSON exactly, including the optional fields
//! that only some routing modes use. [`crate::command`] turns them into
//! validated commands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a connection announces when it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Receives signals addressed to its username.
    Receiver,
    /// Emits signals; never addressable.
    Sender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Receiver => f.write_str("receiver"),
            Role::Sender => f.write_str("sender"),
        }
    }
}

/// A message exactly as sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Register the connection under a username.
    #[serde(rename = "register")]
    Register {
        /// Announced role.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        /// Username to register under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// Emit an action.
    #[serde(rename = "signal")]
    Signal {
        /// Explicit target list.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usernames: Option<Vec<String>>,
        /// Single target, or the sender identity in prefix routing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Sender identity for sender-attributed routing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        /// Opaque action forwarded to receivers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
}

impl WireMessage {
    /// Create a `register` message.
    #[must_use]
    pub fn register(role: Role, username: impl Into<String>) -> Self {
        WireMessage::Register {
            role: Some(role),
            username: Some(username.into()),
        }
    }

    /// Create a `signal` aimed at a single username.
    #[must_use]
    pub fn signal(username: impl Into<String>, action: impl Into<String>) -> Self {
        WireMessage::Signal {
            usernames: None,
            username: Some(username.into()),
            sender: None,
            action: Some(action.into()),
        }
    }

    /// Create a `signal` aimed at several usernames.
    #[must_use]
    pub fn signal_many<I, S>(usernames: I, action: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        WireMessage::Signal {
            usernames: Some(usernames.into_iter().map(Into::into).collect()),
            username: None,
            sender: None,
            action: Some(action.into()),
        }
    }

    /// Create a sender-attributed `signal`.
    #[must_use]
    pub fn signal_from(sender: impl Into<String>, action: impl Into<String>) -> Self {
        WireMessage::Signal {
            usernames: None,
            username: None,
            sender: Some(sender.into()),
            action: Some(action.into()),
        }
    }

    /// The `type` tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Register { .. } => "register",
            WireMessage::Signal { .. } => "signal",
        }
    }
}
