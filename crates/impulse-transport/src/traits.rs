//! Transport abstraction for Impulse.
//!
//! A transport accepts connections and drives each of them against the
//! relay's [`ConnectionEvents`]. The relay never depends on a concrete
//! WebSocket library; everything it needs goes through
//! [`impulse_core::ConnectionHandle`].

use async_trait::async_trait;
use impulse_core::ConnectionEvents;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
}

/// A transport that accepts connections and feeds them to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Each connection runs in its own task and reports its lifecycle
    /// through `events`.
    async fn serve(
        &self,
        events: Arc<dyn ConnectionEvents>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}
