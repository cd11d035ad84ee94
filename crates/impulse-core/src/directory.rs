//! Account directory lookups.
//!
//! The directory is loaded once at startup and read-only afterwards. The
//! router uses it only to check that a target username is a known
//! principal.

use std::collections::HashSet;

/// Read-only view of the known accounts.
pub trait AccountDirectory: Send + Sync {
    /// Whether `username` is a known account.
    fn contains(&self, username: &str) -> bool;

    /// Number of known accounts.
    fn len(&self) -> usize;

    /// Whether the directory has no accounts.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory account directory.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    usernames: HashSet<String>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account. Returns `false` if it was already known.
    pub fn insert(&mut self, username: impl Into<String>) -> bool {
        self.usernames.insert(username.into())
    }
}

impl<S: Into<String>> FromIterator<S> for MemoryDirectory {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            usernames: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccountDirectory for MemoryDirectory {
    fn contains(&self, username: &str) -> bool {
        self.usernames.contains(username)
    }

    fn len(&self) -> usize {
        self.usernames.len()
    }
}
