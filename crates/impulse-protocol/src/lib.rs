//! # impulse-protocol
//!
//! Wire message definitions for the Impulse signaling relay.
//!
//! Clients talk to the relay with two structured message shapes:
//!
//! - `register` - announce a connection as a `receiver` (or `sender`) for a username
//! - `signal` - emit an opaque `action` towards one or more usernames
//!
//! Text frames carry JSON; binary frames carry the same shapes as MessagePack.
//! Decoding always ends in a validated [`Command`], so nothing downstream ever
//! sees a half-parsed message.
//!
//! ## Example
//!
//! ```rust
//! use impulse_protocol::{codec, Command, Encoding, WireMessage};
//!
//! let text = codec::encode_text(&WireMessage::signal("alice", "ring")).unwrap();
//! let command = codec::decode(text.as_bytes(), Encoding::Json).unwrap();
//! assert!(matches!(command, Command::Signal(_)));
//! ```

pub mod codec;
pub mod command;
pub mod messages;

pub use codec::{decode, Encoding, ProtocolError, MAX_MESSAGE_SIZE};
pub use command::{Command, Registration, Signal};
pub use messages::{Role, WireMessage};
