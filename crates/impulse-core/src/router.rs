//! Signal router.
//!
//! The router interprets inbound messages on a live connection. `register`
//! puts a receiver into the registry and onto the topic its routing mode
//! assigns; `signal` resolves a set of topics, publishes the action to each
//! of them once, and reports every resolved target to the audit sink.
//!
//! The protocol has no error channel back to clients: anything the router
//! cannot act on is logged and dropped.

use crate::audit::AuditSink;
use crate::broker::TopicBroker;
use crate::connection::{now_millis, ConnectionId};
use crate::directory::AccountDirectory;
use crate::registry::{ConnectionRegistry, RegisterOutcome};
use crate::routing::{group_topic, partition_of, user_topic, RoutingMode};
use bytes::Bytes;
use impulse_protocol::{codec, Command, Encoding, Registration, Signal};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// How signals map to topics.
    pub mode: RoutingMode,
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Unparseable or failed validation.
    Malformed,
    /// The registry or broker refused the registration.
    RegistrationRejected,
    /// The signal named no usable target for this routing mode.
    NoTargets,
    /// None of the named usernames is a known account.
    UnknownTargets,
    /// No known identity matched a partition prefix.
    NoPartition,
}

impl DropReason {
    /// Stable label for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::RegistrationRejected => "registration_rejected",
            DropReason::NoTargets => "no_targets",
            DropReason::UnknownTargets => "unknown_targets",
            DropReason::NoPartition => "no_partition",
        }
    }
}

/// Delivery summary of a routed signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalReport {
    /// Known identities the signal was routed for.
    pub identities: Vec<String>,
    /// Topics published to, each exactly once.
    pub topics: Vec<String>,
    /// Connections the action was handed to.
    pub delivered: usize,
    /// Connections whose send failed and that were torn down.
    pub failed: Vec<ConnectionId>,
}

/// What the router did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A receiver was registered.
    Registered {
        /// Username it registered under.
        username: String,
        /// Topic it joined, if its routing mode assigned one.
        topic: Option<String>,
    },
    /// A sender announced itself; nothing is stored.
    SenderAccepted,
    /// A signal was routed.
    Routed(SignalReport),
    /// The message was dropped.
    Dropped(DropReason),
}

/// The signal router.
pub struct SignalRouter {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<TopicBroker>,
    directory: Arc<dyn AccountDirectory>,
    audit: Arc<dyn AuditSink>,
    config: RouterConfig,
}

impl SignalRouter {
    /// Create a router over the given registry and broker.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<TopicBroker>,
        directory: Arc<dyn AccountDirectory>,
        audit: Arc<dyn AuditSink>,
        config: RouterConfig,
    ) -> Self {
        debug!(mode = config.mode.name(), "Creating signal router");
        Self {
            registry,
            broker,
            directory,
            audit,
            config,
        }
    }

    /// The active routing mode.
    #[must_use]
    pub fn mode(&self) -> &RoutingMode {
        &self.config.mode
    }

    /// Decode and act on an inbound message.
    pub fn handle_message(&self, id: ConnectionId, data: &[u8], encoding: Encoding) -> RouteOutcome {
        match codec::decode(data, encoding) {
            Ok(command) => self.dispatch(id, command),
            Err(e) => {
                warn!(connection = %id, error = %e, "Dropping malformed message");
                RouteOutcome::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Act on a validated command.
    pub fn dispatch(&self, id: ConnectionId, command: Command) -> RouteOutcome {
        match command {
            Command::Register(registration) => self.register(id, registration),
            Command::Signal(signal) => self.signal(id, signal),
        }
    }

    fn register(&self, id: ConnectionId, registration: Registration) -> RouteOutcome {
        let Registration { role, username } = registration;

        match self.registry.register(id, &username, role) {
            Ok(RegisterOutcome::Ignored) => return RouteOutcome::SenderAccepted,
            Ok(RegisterOutcome::Moved { previous }) => {
                debug!(connection = %id, from = %previous, to = %username, "Receiver moved");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %id, username = %username, error = %e, "Registration rejected");
                return RouteOutcome::Dropped(DropReason::RegistrationRejected);
            }
        }

        let Some(topic) = self.config.mode.receiver_topic(&username) else {
            warn!(
                connection = %id,
                username = %username,
                "Username matches no partition, receiver joins no topic"
            );
            return RouteOutcome::Registered {
                username,
                topic: None,
            };
        };

        if let Err(e) = self.registry.subscribe(id, &topic) {
            warn!(connection = %id, topic = %topic, error = %e, "Subscription failed, rolling back registration");
            self.registry.unregister(id);
            return RouteOutcome::Dropped(DropReason::RegistrationRejected);
        }

        debug!(connection = %id, username = %username, topic = %topic, "Receiver subscribed");
        RouteOutcome::Registered {
            username,
            topic: Some(topic),
        }
    }

    fn signal(&self, id: ConnectionId, signal: Signal) -> RouteOutcome {
        let (identities, topics) = match self.resolve(id, &signal) {
            Ok(resolved) => resolved,
            Err(reason) => {
                warn!(connection = %id, reason = reason.as_str(), "Dropping signal");
                return RouteOutcome::Dropped(reason);
            }
        };

        let payload = Bytes::copy_from_slice(signal.action.as_bytes());
        let mut report = SignalReport::default();

        for topic in &topics {
            let published = self.broker.publish(topic, payload.clone());
            if published.is_empty() {
                debug!(connection = %id, topic = %topic, "No active receiver for topic");
            }
            report.delivered += published.delivered;
            report.failed.extend(published.failed);
        }

        for failed in &report.failed {
            if self.registry.evict(*failed) {
                debug!(connection = %failed, "Tore down connection after failed delivery");
            }
        }

        let timestamp = now_millis();
        for identity in &identities {
            if let Err(e) = self.audit.record(identity, &signal.action, timestamp) {
                warn!(identity = %identity, error = %e, "Failed to record audit entry");
            }
        }

        trace!(
            connection = %id,
            action = %signal.action,
            delivered = report.delivered,
            "Signal routed"
        );

        report.identities = identities;
        report.topics = topics;
        RouteOutcome::Routed(report)
    }

    /// Resolve a signal into `(known identities, topics)`.
    fn resolve(
        &self,
        id: ConnectionId,
        signal: &Signal,
    ) -> Result<(Vec<String>, Vec<String>), DropReason> {
        match &self.config.mode {
            RoutingMode::Direct => {
                if signal.targets.is_empty() {
                    return Err(DropReason::NoTargets);
                }
                let known = self.known(id, &signal.targets)?;
                let topics = known.iter().map(|u| user_topic(u)).collect();
                Ok((known, topics))
            }
            RoutingMode::Broadcast { topic } => {
                let named = if signal.targets.is_empty() {
                    signal.identities()
                } else {
                    signal.targets.iter().map(String::as_str).collect()
                };
                let known = self.known(id, &named)?;
                Ok((known, vec![topic.clone()]))
            }
            RoutingMode::Prefix { prefixes } => {
                let known = self.known(id, &signal.identities())?;
                let mut identities = Vec::with_capacity(known.len());
                let mut topics = Vec::new();
                for identity in known {
                    match partition_of(prefixes, &identity) {
                        Some(prefix) => {
                            let topic = group_topic(prefix);
                            if !topics.contains(&topic) {
                                topics.push(topic);
                            }
                            identities.push(identity);
                        }
                        None => {
                            debug!(connection = %id, identity = %identity, "Identity matches no partition");
                        }
                    }
                }
                if topics.is_empty() {
                    return Err(DropReason::NoPartition);
                }
                Ok((identities, topics))
            }
        }
    }

    /// Known, de-duplicated usernames, in the order given.
    fn known<S: AsRef<str>>(&self, id: ConnectionId, names: &[S]) -> Result<Vec<String>, DropReason> {
        let mut seen = HashSet::new();
        let mut known = Vec::with_capacity(names.len());
        for name in names.iter().map(AsRef::as_ref) {
            if !seen.insert(name) {
                continue;
            }
            if self.directory.contains(name) {
                known.push(name.to_string());
            } else {
                debug!(connection = %id, username = %name, "Dropping unknown target");
            }
        }
        if known.is_empty() {
            return Err(DropReason::UnknownTargets);
        }
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::connection::ConnectionHandle;
    use crate::directory::MemoryDirectory;
    use crate::testing::{MockConnection, RecordingAudit};
    use impulse_protocol::{codec::encode_text, Role, WireMessage};

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        broker: Arc<TopicBroker>,
        audit: Arc<RecordingAudit>,
        router: SignalRouter,
    }

    impl Fixture {
        fn new(mode: RoutingMode) -> Self {
            Self::with_broker(mode, TopicBroker::new(), &[])
        }

        fn with_broker(mode: RoutingMode, broker: TopicBroker, extra_users: &[&str]) -> Self {
            let broker = Arc::new(broker);
            let registry = Arc::new(ConnectionRegistry::new(broker.clone()));
            let directory: MemoryDirectory =
                ["alice", "bob", "up_bob1", "up_bob2", "up_x", "down_carol"]
                    .into_iter()
                    .chain(extra_users.iter().copied())
                    .collect();
            let audit = RecordingAudit::new();
            let router = SignalRouter::new(
                registry.clone(),
                broker.clone(),
                Arc::new(directory),
                audit.clone(),
                RouterConfig { mode },
            );
            Self {
                registry,
                broker,
                audit,
                router,
            }
        }

        fn connect(&self) -> Arc<MockConnection> {
            let conn = MockConnection::new();
            self.registry.open(conn.clone(), "127.0.0.1:9000");
            conn
        }

        fn send(&self, conn: &MockConnection, message: &WireMessage) -> RouteOutcome {
            let text = encode_text(message).unwrap();
            self.router
                .handle_message(conn.id(), text.as_bytes(), Encoding::Json)
        }

        fn receiver(&self, username: &str) -> Arc<MockConnection> {
            let conn = self.connect();
            let outcome = self.send(&conn, &WireMessage::register(Role::Receiver, username));
            assert!(matches!(outcome, RouteOutcome::Registered { .. }));
            conn
        }
    }

    #[test]
    fn test_direct_signal_reaches_named_user_once() {
        let fx = Fixture::new(RoutingMode::Direct);
        let alice = fx.receiver("alice");
        let bob = fx.receiver("bob");
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal("alice", "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.delivered, 1);
        assert_eq!(report.topics, vec!["user:alice"]);
        assert_eq!(alice.received(), vec!["ring"]);
        assert!(bob.received().is_empty());
        assert!(sender.received().is_empty());
        assert_eq!(fx.audit.records(), vec![("alice".into(), "ring".into())]);
    }

    #[test]
    fn test_long_username_receives_signals() {
        let long_name = "l".repeat(300);
        let fx = Fixture::with_broker(
            RoutingMode::Direct,
            TopicBroker::new(),
            &[long_name.as_str()],
        );
        let receiver = fx.receiver(&long_name);
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal(long_name.as_str(), "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.delivered, 1);
        assert_eq!(receiver.received(), vec!["ring"]);
    }

    #[test]
    fn test_topic_limit_never_refuses_receivers() {
        let broker = TopicBroker::with_config(BrokerConfig { max_topics: 2 });
        let fx = Fixture::with_broker(RoutingMode::Direct, broker, &["u1", "u2", "u3"]);
        let receivers: Vec<_> = ["u1", "u2", "u3"].iter().map(|u| fx.receiver(u)).collect();
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal("u3", "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.delivered, 1);
        assert_eq!(receivers[2].received(), vec!["ring"]);
        assert_eq!(fx.broker.stats().topic_count, 3);
    }

    #[test]
    fn test_every_device_of_a_user_receives() {
        let fx = Fixture::new(RoutingMode::Direct);
        let phone = fx.receiver("alice");
        let laptop = fx.receiver("alice");
        let sender = fx.connect();

        fx.send(&sender, &WireMessage::signal("alice", "ring"));
        assert_eq!(phone.received(), vec!["ring"]);
        assert_eq!(laptop.received(), vec!["ring"]);
    }

    #[test]
    fn test_unknown_targets_are_dropped() {
        let fx = Fixture::new(RoutingMode::Direct);
        let alice = fx.receiver("alice");
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal_many(["alice", "ghost"], "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.identities, vec!["alice"]);
        assert_eq!(alice.received(), vec!["ring"]);

        let outcome = fx.send(&sender, &WireMessage::signal_many(["ghost"], "ring"));
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::UnknownTargets));
        assert_eq!(alice.received().len(), 1);
    }

    #[test]
    fn test_duplicate_targets_deliver_once() {
        let fx = Fixture::new(RoutingMode::Direct);
        let alice = fx.receiver("alice");
        let sender = fx.connect();

        fx.send(&sender, &WireMessage::signal_many(["alice", "alice"], "ring"));
        assert_eq!(alice.received(), vec!["ring"]);
        assert_eq!(fx.audit.records().len(), 1);
    }

    #[test]
    fn test_known_user_without_receivers_is_silent() {
        let fx = Fixture::new(RoutingMode::Direct);
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal("bob", "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.delivered, 0);
        assert!(!fx.broker.topic_exists("user:bob"));
    }

    #[test]
    fn test_direct_mode_needs_explicit_targets() {
        let fx = Fixture::new(RoutingMode::Direct);
        let sender = fx.connect();
        assert_eq!(
            fx.send(&sender, &WireMessage::signal_from("alice", "ring")),
            RouteOutcome::Dropped(DropReason::NoTargets)
        );
    }

    #[test]
    fn test_broadcast_reaches_every_receiver() {
        let fx = Fixture::new(RoutingMode::broadcast());
        let alice = fx.receiver("alice");
        let bob = fx.receiver("bob");
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal("alice", "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.topics, vec!["all"]);
        assert_eq!(report.delivered, 2);
        assert_eq!(alice.received(), vec!["ring"]);
        assert_eq!(bob.received(), vec!["ring"]);

        // Unknown targets still gate the broadcast
        assert_eq!(
            fx.send(&sender, &WireMessage::signal("ghost", "ring")),
            RouteOutcome::Dropped(DropReason::UnknownTargets)
        );
    }

    #[test]
    fn test_prefix_partition_routing() {
        let fx = Fixture::new(RoutingMode::prefix(["up_", "down_"]));
        let bob1 = fx.receiver("up_bob1");
        let bob2 = fx.receiver("up_bob2");
        let carol = fx.receiver("down_carol");
        let sender = fx.connect();

        assert_eq!(
            fx.send(&sender, &WireMessage::register(Role::Sender, "up_x")),
            RouteOutcome::SenderAccepted
        );

        let outcome = fx.send(&sender, &WireMessage::signal_from("up_x", "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.topics, vec!["group:up_"]);
        assert_eq!(bob1.received(), vec!["ring"]);
        assert_eq!(bob2.received(), vec!["ring"]);
        assert!(carol.received().is_empty());
        assert_eq!(fx.audit.records(), vec![("up_x".into(), "ring".into())]);
    }

    #[test]
    fn test_prefix_username_acts_as_sender() {
        let fx = Fixture::new(RoutingMode::prefix(["up_", "down_"]));
        let carol = fx.receiver("down_carol");
        let sender = fx.connect();

        fx.send(&sender, &WireMessage::signal("down_carol", "ring"));
        assert_eq!(carol.received(), vec!["ring"]);

        // alice is known but belongs to no partition
        assert_eq!(
            fx.send(&sender, &WireMessage::signal_from("alice", "ring")),
            RouteOutcome::Dropped(DropReason::NoPartition)
        );
    }

    #[test]
    fn test_receiver_outside_partitions_joins_nothing() {
        let fx = Fixture::new(RoutingMode::prefix(["up_"]));
        let conn = fx.connect();

        let outcome = fx.send(&conn, &WireMessage::register(Role::Receiver, "alice"));
        assert_eq!(
            outcome,
            RouteOutcome::Registered {
                username: "alice".into(),
                topic: None
            }
        );
        assert_eq!(fx.registry.lookup("alice"), vec![conn.id()]);
        assert_eq!(fx.broker.stats().topic_count, 0);
    }

    #[test]
    fn test_malformed_messages_are_dropped() {
        let fx = Fixture::new(RoutingMode::Direct);
        let conn = fx.connect();

        for raw in [
            "garbage",
            r#"{"type":"signal","usernames":"alice","action":"ring"}"#,
            r#"{"type":"signal","username":"alice"}"#,
            r#"{"type":"register","role":"receiver"}"#,
        ] {
            assert_eq!(
                fx.router.handle_message(conn.id(), raw.as_bytes(), Encoding::Json),
                RouteOutcome::Dropped(DropReason::Malformed)
            );
        }
        assert!(fx.registry.is_open(conn.id()));
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_failed_delivery_tears_subscriber_down() {
        let fx = Fixture::new(RoutingMode::Direct);
        let healthy = fx.receiver("alice");
        let broken = fx.receiver("alice");
        broken.break_sends();
        let sender = fx.connect();

        let outcome = fx.send(&sender, &WireMessage::signal("alice", "ring"));
        let RouteOutcome::Routed(report) = outcome else {
            panic!("expected routed signal");
        };
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![broken.id()]);
        assert!(broken.is_closed());
        assert!(!fx.registry.is_open(broken.id()));
        assert_eq!(fx.registry.lookup("alice"), vec![healthy.id()]);
        assert_eq!(fx.broker.subscribers("user:alice"), vec![healthy.id()]);
    }

    #[test]
    fn test_audit_failure_does_not_block_delivery() {
        let fx = Fixture::new(RoutingMode::Direct);
        let alice = fx.receiver("alice");
        let sender = fx.connect();
        fx.audit.fail_writes();

        let outcome = fx.send(&sender, &WireMessage::signal("alice", "ring"));
        assert!(matches!(outcome, RouteOutcome::Routed(_)));
        assert_eq!(alice.received(), vec!["ring"]);
    }

    #[test]
    fn test_registration_on_closed_connection_is_rejected() {
        let fx = Fixture::new(RoutingMode::Direct);
        let conn = fx.connect();
        fx.registry.close(conn.id());

        assert_eq!(
            fx.send(&conn, &WireMessage::register(Role::Receiver, "alice")),
            RouteOutcome::Dropped(DropReason::RegistrationRejected)
        );
        assert!(fx.registry.lookup("alice").is_empty());
        assert!(!fx.broker.topic_exists("user:alice"));
    }
}
