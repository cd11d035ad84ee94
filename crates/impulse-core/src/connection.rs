//! Connection capability and per-connection liveness metadata.
//!
//! The core never touches a transport directly. Every transport adapter
//! hands the core an [`Arc<dyn ConnectionHandle>`] that can send a payload,
//! send a ping control frame, and close.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Counter backing [`ConnectionId::next`]; ids are never reused.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors reported by a connection handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection is already closed.
    #[error("Connection closed")]
    Closed,

    /// The transport refused the frame.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// A live transport connection, as seen by the core.
///
/// Implementations must not block: `send` and `ping` queue the frame for the
/// connection's writer and return immediately.
pub trait ConnectionHandle: Send + Sync {
    /// The connection's identifier.
    fn id(&self) -> ConnectionId;

    /// Queue a payload for delivery, verbatim.
    fn send(&self, payload: Bytes) -> Result<(), ConnectionError>;

    /// Queue a ping control frame.
    fn ping(&self) -> Result<(), ConnectionError>;

    /// Close the transport. Calling it twice is harmless.
    fn close(&self);

    /// Whether the transport is still open.
    fn is_open(&self) -> bool {
        true
    }
}

/// Heartbeat state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    /// Answered the last ping (or has not been pinged yet).
    Alive,
    /// Pinged, no pong since.
    AwaitingPong,
    /// Teardown in progress; must not be pinged or registered.
    Closing,
}

/// Liveness metadata tracked for every open connection.
#[derive(Debug, Clone)]
pub struct Liveness {
    /// Heartbeat state.
    pub state: LivenessState,
    /// When the last ping was sent.
    pub last_ping_sent_at: Option<Instant>,
    /// Consecutive ticks without a pong.
    pub missed_pongs: u32,
    /// Last measured ping to pong latency, 0 until the first pong.
    pub round_trip_millis: u64,
}

impl Liveness {
    /// Fresh metadata for a just-opened connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LivenessState::Alive,
            last_ping_sent_at: None,
            missed_pongs: 0,
            round_trip_millis: 0,
        }
    }

    /// Whether teardown has started.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state == LivenessState::Closing
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot of a connection, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// Remote address reported by the transport.
    pub remote_address: String,
    /// Username the connection is registered under, if any.
    pub username: Option<String>,
    /// Unix timestamp (ms) when the connection opened.
    pub connected_at: u64,
    /// Heartbeat state.
    pub state: LivenessState,
    /// Consecutive missed pongs.
    pub missed_pongs: u32,
    /// Last measured round trip in milliseconds.
    pub round_trip_millis: u64,
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
