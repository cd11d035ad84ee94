//! Codec for Impulse wire messages.
//!
//! Text frames are JSON, binary frames are MessagePack with named fields.
//! Both decode through the same validation into a [`Command`].

use thiserror::Error;

use crate::command::Command;
use crate::messages::WireMessage;

/// Maximum inbound message size (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Encoding of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// JSON text frame.
    Json,
    /// MessagePack binary frame.
    MessagePack,
}

/// Errors that can occur while decoding or validating a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the size limit.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    TooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A required field is absent.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A required field is present but empty.
    #[error("Field must not be empty: {0}")]
    EmptyField(&'static str),
}

/// Decode and validate an inbound frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, unparseable, or fails
/// validation.
pub fn decode(data: &[u8], encoding: Encoding) -> Result<Command, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }

    let message: WireMessage = match encoding {
        Encoding::Json => serde_json::from_slice(data)?,
        Encoding::MessagePack => rmp_serde::from_slice(data)?,
    };

    Command::try_from(message)
}

/// Decode and validate a JSON text frame.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_text(text: &str) -> Result<Command, ProtocolError> {
    decode(text.as_bytes(), Encoding::Json)
}

/// Encode a message as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text(message: &WireMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Encode a message as a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_binary(message: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Registration, Signal};
    use crate::messages::Role;

    #[test]
    fn test_decode_register_text() {
        let cmd =
            decode_text(r#"{"type":"register","role":"receiver","username":"alice"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Register(Registration {
                role: Role::Receiver,
                username: "alice".into()
            })
        );
    }

    #[test]
    fn test_decode_signal_binary() {
        let encoded = encode_binary(&WireMessage::signal_many(["alice", "ghost"], "ring")).unwrap();
        let cmd = decode(&encoded, Encoding::MessagePack).unwrap();
        assert_eq!(
            cmd,
            Command::Signal(Signal {
                targets: vec!["alice".into(), "ghost".into()],
                sender: None,
                action: "ring".into(),
            })
        );
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(
            decode_text("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_text(r#"{"type":"dance"}"#),
            Err(ProtocolError::Json(_))
        ));
        // `usernames` must be a sequence
        assert!(matches!(
            decode_text(r#"{"type":"signal","usernames":"alice","action":"ring"}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_text(r#"{"type":"register","role":"receiver"}"#),
            Err(ProtocolError::MissingField("username"))
        ));
    }

    #[test]
    fn test_message_too_large() {
        let data = vec![b' '; MAX_MESSAGE_SIZE + 1];
        match decode(&data, Encoding::Json) {
            Err(ProtocolError::TooLarge(size)) => assert_eq!(size, MAX_MESSAGE_SIZE + 1),
            other => panic!("Expected TooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_action_is_preserved_verbatim() {
        let text = encode_text(&WireMessage::signal("alice", "ring \u{1F514} \"loud\"")).unwrap();
        let Command::Signal(signal) = decode_text(&text).unwrap() else {
            panic!("expected signal");
        };
        assert_eq!(signal.action, "ring \u{1F514} \"loud\"");
    }
}
