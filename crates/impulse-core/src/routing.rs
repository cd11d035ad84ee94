//! Routing modes and topic naming.
//!
//! A routing mode decides two things: which topic a receiver joins when it
//! registers, and which topics a signal is published to.

use serde::{Deserialize, Serialize};

/// Shared topic used by broadcast routing when none is configured.
pub const DEFAULT_SHARED_TOPIC: &str = "all";

/// Topic holding the receivers of a single username.
#[must_use]
pub fn user_topic(username: &str) -> String {
    format!("user:{}", username)
}

/// Topic holding the receivers of a username prefix partition.
#[must_use]
pub fn group_topic(prefix: &str) -> String {
    format!("group:{}", prefix)
}

/// How signals are mapped to topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RoutingMode {
    /// Each receiver joins its own username topic; signals go to the named
    /// usernames only.
    #[default]
    Direct,
    /// Every receiver joins one shared topic; a signal reaches all of them.
    Broadcast {
        /// Name of the shared topic.
        #[serde(default = "default_shared_topic")]
        topic: String,
    },
    /// Receivers join the topic of their username prefix; a signal goes to
    /// the partition of its sender.
    Prefix {
        /// Known partition prefixes.
        prefixes: Vec<String>,
    },
}

impl RoutingMode {
    /// Broadcast routing over the default shared topic.
    #[must_use]
    pub fn broadcast() -> Self {
        RoutingMode::Broadcast {
            topic: DEFAULT_SHARED_TOPIC.to_string(),
        }
    }

    /// Prefix routing over the given partitions.
    #[must_use]
    pub fn prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RoutingMode::Prefix {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Short name of the mode, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RoutingMode::Direct => "direct",
            RoutingMode::Broadcast { .. } => "broadcast",
            RoutingMode::Prefix { .. } => "prefix",
        }
    }

    /// Topic a receiver registered under `username` joins.
    ///
    /// `None` in prefix mode when the username matches no partition.
    #[must_use]
    pub fn receiver_topic(&self, username: &str) -> Option<String> {
        match self {
            RoutingMode::Direct => Some(user_topic(username)),
            RoutingMode::Broadcast { topic } => Some(topic.clone()),
            RoutingMode::Prefix { prefixes } => partition_of(prefixes, username).map(group_topic),
        }
    }
}

fn default_shared_topic() -> String {
    DEFAULT_SHARED_TOPIC.to_string()
}

/// The longest configured prefix `username` starts with.
#[must_use]
pub fn partition_of<'a>(prefixes: &'a [String], username: &str) -> Option<&'a str> {
    prefixes
        .iter()
        .filter(|p| !p.is_empty() && username.starts_with(p.as_str()))
        .max_by_key(|p| p.len())
        .map(String::as_str)
}
