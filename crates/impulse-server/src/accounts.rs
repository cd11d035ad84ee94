//! Account file loading.
//!
//! The account file is a JSON array of `{ "username", "password" }`
//! objects. Only usernames matter to the relay; passwords belong to the
//! login service and are never read here.

use impulse_core::{AccountDirectory, MemoryDirectory};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Account file errors.
#[derive(Debug, Error)]
pub enum AccountsError {
    /// The file could not be read.
    #[error("Failed to read account file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a JSON account list.
    #[error("Failed to parse account file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct Account {
    username: String,
}

/// Parse an account list.
///
/// # Errors
///
/// Returns an error if `contents` is not a JSON array of accounts.
pub fn parse_accounts(contents: &str) -> Result<MemoryDirectory, AccountsError> {
    let accounts: Vec<Account> = serde_json::from_str(contents)?;
    Ok(accounts
        .into_iter()
        .map(|account| account.username)
        .filter(|username| !username.is_empty())
        .collect())
}

/// Read an account file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_accounts(path: impl AsRef<Path>) -> Result<MemoryDirectory, AccountsError> {
    let contents = std::fs::read_to_string(path)?;
    parse_accounts(&contents)
}

/// Load the account directory, falling back to an empty one.
///
/// With an empty directory every signal is dropped as unknown.
#[must_use]
pub fn load_directory(path: &str) -> MemoryDirectory {
    let expanded = shellexpand::tilde(path);
    match read_accounts(expanded.as_ref()) {
        Ok(directory) => {
            info!(path = %expanded, accounts = directory.len(), "Loaded accounts");
            directory
        }
        Err(e) => {
            warn!(path = %expanded, error = %e, "No accounts loaded, every signal will be dropped");
            MemoryDirectory::new()
        }
    }
}
