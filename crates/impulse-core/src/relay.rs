//! Relay lifecycle hub.
//!
//! [`Relay`] wires the registry, broker, router and heartbeat monitor
//! together and exposes the four transport callbacks through
//! [`ConnectionEvents`]. Transport adapters only ever talk to the core
//! through this trait and the [`ConnectionHandle`] they hand in on open.

use crate::audit::AuditSink;
use crate::broker::{BrokerConfig, BrokerStats, TopicBroker};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::directory::AccountDirectory;
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::registry::{ConnectionRegistry, RegistryStats};
use crate::router::{RouteOutcome, RouterConfig, SignalRouter};
use impulse_protocol::Encoding;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Lifecycle callbacks a transport delivers for each connection.
///
/// Calls for the same connection must not overlap.
pub trait ConnectionEvents: Send + Sync {
    /// A transport connection opened.
    fn on_open(&self, handle: Arc<dyn ConnectionHandle>, remote_address: String);

    /// A data frame arrived.
    fn on_message(&self, id: ConnectionId, data: &[u8], encoding: Encoding);

    /// A pong control frame arrived.
    fn on_pong(&self, id: ConnectionId);

    /// The transport closed.
    fn on_close(&self, id: ConnectionId);
}

/// Relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Routing policy.
    pub router: RouterConfig,
    /// Liveness checks.
    pub heartbeat: HeartbeatConfig,
    /// Limits on topics subscribed through the broker directly. Topics the
    /// router derives for receivers are exempt.
    pub broker: BrokerConfig,
}

/// Relay statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelayStats {
    /// Connection registry.
    pub registry: RegistryStats,
    /// Topic broker.
    pub broker: BrokerStats,
}

/// The signaling relay core.
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<TopicBroker>,
    router: SignalRouter,
    heartbeat: HeartbeatMonitor,
}

impl Relay {
    /// Build a relay over an account directory and an audit sink.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        directory: Arc<dyn AccountDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        info!(
            mode = config.router.mode.name(),
            accounts = directory.len(),
            "Creating relay"
        );

        let broker = Arc::new(TopicBroker::with_config(config.broker));
        let registry = Arc::new(ConnectionRegistry::new(broker.clone()));
        let router = SignalRouter::new(
            registry.clone(),
            broker.clone(),
            directory,
            audit,
            config.router,
        );
        let heartbeat = HeartbeatMonitor::new(registry.clone(), config.heartbeat);

        Self {
            registry,
            broker,
            router,
            heartbeat,
        }
    }

    /// Connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Topic broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<TopicBroker> {
        &self.broker
    }

    /// Signal router.
    #[must_use]
    pub fn router(&self) -> &SignalRouter {
        &self.router
    }

    /// Heartbeat monitor. Drive it with [`HeartbeatMonitor::run`].
    #[must_use]
    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Track a newly opened connection.
    pub fn open(&self, handle: Arc<dyn ConnectionHandle>, remote_address: impl Into<String>) {
        self.registry.open(handle, remote_address);
    }

    /// Route an inbound frame.
    pub fn handle_message(&self, id: ConnectionId, data: &[u8], encoding: Encoding) -> RouteOutcome {
        self.router.handle_message(id, data, encoding)
    }

    /// Record a pong. Returns the round trip in milliseconds.
    pub fn handle_pong(&self, id: ConnectionId) -> Option<u64> {
        self.heartbeat.on_pong(id, Instant::now())
    }

    /// Tear a connection down after its transport closed.
    ///
    /// Returns `false` if it was already gone.
    pub fn close(&self, id: ConnectionId) -> bool {
        self.registry.close(id).is_some()
    }

    /// Close every open connection.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.close_all();
        debug!(closed, "Relay shut down");
        closed
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            registry: self.registry.stats(),
            broker: self.broker.stats(),
        }
    }
}

impl ConnectionEvents for Relay {
    fn on_open(&self, handle: Arc<dyn ConnectionHandle>, remote_address: String) {
        self.open(handle, remote_address);
    }

    fn on_message(&self, id: ConnectionId, data: &[u8], encoding: Encoding) {
        self.handle_message(id, data, encoding);
    }

    fn on_pong(&self, id: ConnectionId) {
        self.handle_pong(id);
    }

    fn on_close(&self, id: ConnectionId) {
        self.close(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::routing::RoutingMode;
    use crate::testing::{MockConnection, RecordingAudit};

    fn relay(mode: RoutingMode) -> Relay {
        let directory: MemoryDirectory = ["alice", "bob"].into_iter().collect();
        Relay::new(
            RelayConfig {
                router: RouterConfig { mode },
                ..RelayConfig::default()
            },
            Arc::new(directory),
            RecordingAudit::new(),
        )
    }

    fn connect(relay: &Relay) -> Arc<MockConnection> {
        let conn = MockConnection::new();
        relay.on_open(conn.clone(), "10.0.0.1:5000".to_string());
        conn
    }

    fn text(relay: &Relay, conn: &MockConnection, raw: &str) {
        relay.on_message(conn.id(), raw.as_bytes(), Encoding::Json);
    }

    #[test]
    fn test_register_and_signal_over_callbacks() {
        let relay = relay(RoutingMode::Direct);
        let alice = connect(&relay);
        let sender = connect(&relay);

        text(&relay, &alice, r#"{"type":"register","role":"receiver","username":"alice"}"#);
        text(&relay, &sender, r#"{"type":"signal","username":"alice","action":"ring"}"#);

        assert_eq!(alice.received(), vec!["ring"]);
        let stats = relay.stats();
        assert_eq!(stats.registry.connections, 2);
        assert_eq!(stats.registry.receivers, 1);
        assert_eq!(stats.broker.topic_count, 1);
    }

    #[test]
    fn test_close_removes_every_trace() {
        let relay = relay(RoutingMode::broadcast());
        let alice = connect(&relay);
        text(&relay, &alice, r#"{"type":"register","role":"receiver","username":"alice"}"#);

        relay.on_close(alice.id());
        relay.on_close(alice.id());

        assert!(relay.registry().lookup("alice").is_empty());
        assert!(relay.broker().topics_of(alice.id()).is_empty());
        assert_eq!(relay.stats().broker.topic_count, 0);
        assert!(!relay.close(alice.id()));

        // Late frames for a closed connection change nothing.
        text(&relay, &alice, r#"{"type":"register","role":"receiver","username":"alice"}"#);
        assert!(relay.registry().lookup("alice").is_empty());
    }

    #[test]
    fn test_evicted_receiver_is_unreachable() {
        let relay = relay(RoutingMode::Direct);
        let alice = connect(&relay);
        let sender = connect(&relay);
        text(&relay, &alice, r#"{"type":"register","role":"receiver","username":"alice"}"#);

        // The sender answers every ping, alice never does.
        let start = Instant::now();
        for n in 0..3u64 {
            let now = start + std::time::Duration::from_secs(10 * n);
            relay.heartbeat().tick(now);
            relay.heartbeat().on_pong(sender.id(), now);
        }

        assert!(alice.is_closed());
        assert!(!sender.is_closed());

        let outcome = relay.handle_message(
            sender.id(),
            br#"{"type":"signal","username":"alice","action":"ring"}"#,
            Encoding::Json,
        );
        match outcome {
            RouteOutcome::Routed(report) => assert_eq!(report.delivered, 0),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(alice.received().is_empty());
    }

    #[test]
    fn test_pong_round_trip() {
        let relay = relay(RoutingMode::Direct);
        let conn = connect(&relay);
        relay.heartbeat().tick(Instant::now());

        assert!(relay.handle_pong(conn.id()).is_some());
        assert_eq!(relay.registry().info(conn.id()).unwrap().missed_pongs, 0);
        assert_eq!(relay.handle_pong(ConnectionId::next()), None);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let relay = relay(RoutingMode::Direct);
        let a = connect(&relay);
        let b = connect(&relay);
        text(&relay, &a, r#"{"type":"register","role":"receiver","username":"alice"}"#);

        assert_eq!(relay.shutdown(), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(relay.stats().registry.connections, 0);
        assert_eq!(relay.stats().broker.topic_count, 0);
    }

    #[test]
    fn test_binary_frames_are_messagepack() {
        let relay = relay(RoutingMode::Direct);
        let alice = connect(&relay);
        let sender = connect(&relay);

        let register = impulse_protocol::codec::encode_binary(
            &impulse_protocol::WireMessage::register(impulse_protocol::Role::Receiver, "alice"),
        )
        .unwrap();
        relay.on_message(alice.id(), &register, Encoding::MessagePack);

        let signal = impulse_protocol::codec::encode_binary(
            &impulse_protocol::WireMessage::signal("alice", "ring"),
        )
        .unwrap();
        relay.on_message(sender.id(), &signal, Encoding::MessagePack);

        assert_eq!(alice.received(), vec!["ring"]);
    }
}
