//! Channel-backed connection handle.
//!
//! The core only ever sees a [`ChannelHandle`]. Sends, pings and closes are
//! queued to the connection's writer task and never wait on the socket.

use bytes::Bytes;
use impulse_core::{ConnectionError, ConnectionHandle, ConnectionId};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Work queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver a payload verbatim.
    Payload(Bytes),
    /// Send a ping control frame.
    Ping,
    /// Send a close frame and stop.
    Close,
}

/// A [`ConnectionHandle`] that feeds a bounded writer queue.
#[derive(Debug)]
pub struct ChannelHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl ChannelHandle {
    /// Create a handle and the queue its writer drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: ConnectionId::next(),
            tx,
            closed: CancellationToken::new(),
        });
        (handle, rx)
    }

    /// Resolves once [`ConnectionHandle::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn enqueue(&self, item: Outbound) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::SendFailed("outbound queue full".into()),
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }
}

impl ConnectionHandle for ChannelHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        self.enqueue(Outbound::Payload(payload))
    }

    fn ping(&self) -> Result<(), ConnectionError> {
        self.enqueue(Outbound::Ping)
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        // Best effort: a full queue still stops the session below.
        let _ = self.tx.try_send(Outbound::Close);
        self.closed.cancel();
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}
