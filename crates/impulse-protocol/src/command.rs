//! Validated commands.
//!
//! A [`Command`] is only ever built from a [`WireMessage`] that passed
//! validation, so required fields are plain values here.

use crate::codec::ProtocolError;
use crate::messages::{Role, WireMessage};

/// A validated inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register the connection under a username.
    Register(Registration),
    /// Route an action.
    Signal(Signal),
}

/// A validated `register` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Announced role.
    pub role: Role,
    /// Non-empty username.
    pub username: String,
}

/// A validated `signal` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Explicit targets, from `usernames` or a single `username`.
    /// May be empty when only `sender` was given.
    pub targets: Vec<String>,
    /// Sender identity, if the client attributed the signal.
    pub sender: Option<String>,
    /// Opaque action, forwarded verbatim.
    pub action: String,
}

impl Signal {
    /// Identities to derive partition topics from.
    ///
    /// An explicit `sender` wins; otherwise the named usernames act as
    /// sender identities.
    #[must_use]
    pub fn identities(&self) -> Vec<&str> {
        match &self.sender {
            Some(sender) => vec![sender.as_str()],
            None => self.targets.iter().map(String::as_str).collect(),
        }
    }
}

impl TryFrom<WireMessage> for Command {
    type Error = ProtocolError;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        match message {
            WireMessage::Register { role, username } => {
                let username = username.ok_or(ProtocolError::MissingField("username"))?;
                if username.is_empty() {
                    return Err(ProtocolError::EmptyField("username"));
                }
                let role = role.ok_or(ProtocolError::MissingField("role"))?;
                Ok(Command::Register(Registration { role, username }))
            }
            WireMessage::Signal {
                usernames,
                username,
                sender,
                action,
            } => {
                let action = action.ok_or(ProtocolError::MissingField("action"))?;
                let targets = match (usernames, username) {
                    (Some(list), _) => list,
                    (None, Some(single)) => vec![single],
                    (None, None) => Vec::new(),
                };
                let sender = sender.filter(|s| !s.is_empty());
                if targets.is_empty() && sender.is_none() {
                    return Err(ProtocolError::MissingField("usernames"));
                }
                Ok(Command::Signal(Signal {
                    targets,
                    sender,
                    action,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_requires_username() {
        let err = Command::try_from(WireMessage::Register {
            role: Some(Role::Receiver),
            username: None,
        })
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("username")));

        let err = Command::try_from(WireMessage::register(Role::Receiver, "")).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyField("username")));
    }

    #[test]
    fn test_register_requires_role() {
        let err = Command::try_from(WireMessage::Register {
            role: None,
            username: Some("alice".into()),
        })
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("role")));
    }

    #[test]
    fn test_single_username_becomes_target_list() {
        let cmd = Command::try_from(WireMessage::signal("alice", "ring")).unwrap();
        let Command::Signal(signal) = cmd else {
            panic!("expected signal");
        };
        assert_eq!(signal.targets, vec!["alice".to_string()]);
        assert_eq!(signal.identities(), vec!["alice"]);
    }

    #[test]
    fn test_usernames_take_precedence_over_username() {
        let cmd = Command::try_from(WireMessage::Signal {
            usernames: Some(vec!["a".into(), "b".into()]),
            username: Some("c".into()),
            sender: None,
            action: Some("ring".into()),
        })
        .unwrap();
        let Command::Signal(signal) = cmd else {
            panic!("expected signal");
        };
        assert_eq!(signal.targets, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_sender_wins_identity() {
        let cmd = Command::try_from(WireMessage::signal_from("up_x", "ring")).unwrap();
        let Command::Signal(signal) = cmd else {
            panic!("expected signal");
        };
        assert!(signal.targets.is_empty());
        assert_eq!(signal.identities(), vec!["up_x"]);
    }

    #[test]
    fn test_signal_requires_action_and_target() {
        let err = Command::try_from(WireMessage::Signal {
            usernames: None,
            username: Some("alice".into()),
            sender: None,
            action: None,
        })
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("action")));

        let err = Command::try_from(WireMessage::Signal {
            usernames: None,
            username: None,
            sender: None,
            action: Some("ring".into()),
        })
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("usernames")));

        let err = Command::try_from(WireMessage::signal_from("", "ring")).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("usernames")));
    }
}
