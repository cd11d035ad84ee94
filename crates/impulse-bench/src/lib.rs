//! Shared fixtures for the Impulse benchmarks.

use bytes::Bytes;
use impulse_core::{
    ConnectionError, ConnectionHandle, ConnectionId, MemoryDirectory, NullAuditSink, Relay,
    RelayConfig, RouterConfig, RoutingMode,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A connection that only counts what it is sent.
#[derive(Debug)]
pub struct CountingConnection {
    id: ConnectionId,
    sent: AtomicU64,
    pings: AtomicU64,
}

impl CountingConnection {
    /// Create a connection with a fresh ID.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            sent: AtomicU64::new(0),
            pings: AtomicU64::new(0),
        })
    }

    /// Payloads received so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl ConnectionHandle for CountingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, _payload: Bytes) -> Result<(), ConnectionError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn ping(&self) -> Result<(), ConnectionError> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {}
}

/// A relay whose directory knows `user-0` through `user-{accounts - 1}`.
#[must_use]
pub fn relay(mode: RoutingMode, accounts: usize) -> Relay {
    let directory: MemoryDirectory = (0..accounts).map(|i| format!("user-{}", i)).collect();
    Relay::new(
        RelayConfig {
            router: RouterConfig { mode },
            ..RelayConfig::default()
        },
        Arc::new(directory),
        Arc::new(NullAuditSink),
    )
}

/// Open a connection on `relay` and register it as a receiver.
pub fn receiver(relay: &Relay, username: &str) -> Arc<CountingConnection> {
    let conn = CountingConnection::new();
    relay.open(conn.clone(), "127.0.0.1:0");
    let register = format!(
        r#"{{"type":"register","role":"receiver","username":"{}"}}"#,
        username
    );
    relay.handle_message(
        conn.id(),
        register.as_bytes(),
        impulse_protocol::Encoding::Json,
    );
    conn
}
