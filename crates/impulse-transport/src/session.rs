//! WebSocket session driver shared by every adapter.
//!
//! A session owns one socket. It registers a [`ChannelHandle`] with the
//! relay, runs a writer task that drains the handle's queue into the
//! socket, and feeds inbound frames to [`ConnectionEvents`] until either
//! side closes. Text frames are JSON, binary frames are MessagePack.

use crate::handle::{ChannelHandle, Outbound};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use impulse_core::{ConnectionEvents, ConnectionHandle};
use impulse_protocol::{Encoding, MAX_MESSAGE_SIZE};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How long a closing session waits for queued frames to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame size past which the WebSocket library itself fails the connection.
pub const FRAME_SIZE_CEILING: usize = 16 << 20;

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest inbound data frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued before sends start failing.
    pub queue_capacity: usize,
}

impl SessionConfig {
    /// Limit to hand the WebSocket library.
    ///
    /// It sits well above `max_message_size` so that oversized messages
    /// reach the session and are dropped there instead of failing the
    /// connection.
    #[must_use]
    pub fn transport_limit(&self) -> usize {
        self.max_message_size.max(FRAME_SIZE_CEILING)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            queue_capacity: 1024,
        }
    }
}

/// What an inbound WebSocket frame means to the relay.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// An application message.
    Data(Vec<u8>, Encoding),
    /// A pong control frame.
    Pong,
    /// The peer is closing.
    Close,
    /// Anything else; pings are answered by the WebSocket library.
    Ignored,
}

/// Mapping between a WebSocket library's message type and the relay's
/// frames.
pub trait WsMessage: Sized + Send + 'static {
    /// Classify an inbound frame.
    fn into_inbound(self) -> Inbound;

    /// Build the frame for queued outbound work.
    fn from_outbound(outbound: Outbound) -> Self;
}

/// Outbound payloads go out as text when they are valid UTF-8.
pub(crate) fn payload_frame(payload: Bytes) -> Result<String, Vec<u8>> {
    String::from_utf8(payload.to_vec()).map_err(|e| e.into_bytes())
}

/// Drive one WebSocket connection until it closes.
///
/// Returns once the relay has seen `on_close` for the connection.
pub async fn run_session<S, M, E>(
    socket: S,
    remote_address: String,
    events: Arc<dyn ConnectionEvents>,
    config: SessionConfig,
) where
    S: Stream<Item = Result<M, E>> + Sink<M> + Send + 'static,
    <S as Sink<M>>::Error: Display + Send,
    M: WsMessage,
    E: Display + Send,
{
    let (handle, mut queue) = ChannelHandle::new(config.queue_capacity);
    let id = handle.id();
    let (mut sink, mut stream) = socket.split();

    debug!(connection = %id, remote = %remote_address, "WebSocket connected");
    events.on_open(handle.clone(), remote_address);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = queue.recv().await {
            let closing = outbound == Outbound::Close;
            if let Err(e) = sink.send(M::from_outbound(outbound)).await {
                debug!(connection = %id, error = %e, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            biased;

            _ = handle.closed() => {
                debug!(connection = %id, "Connection closed by relay");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(message)) => match message.into_inbound() {
                        Inbound::Data(data, encoding) => {
                            if data.len() > config.max_message_size {
                                warn!(
                                    connection = %id,
                                    size = data.len(),
                                    max = config.max_message_size,
                                    "Dropping oversized message"
                                );
                                continue;
                            }
                            trace!(connection = %id, size = data.len(), "Inbound message");
                            events.on_message(id, &data, encoding);
                        }
                        Inbound::Pong => events.on_pong(id),
                        Inbound::Close => {
                            debug!(connection = %id, "Received close frame");
                            break;
                        }
                        Inbound::Ignored => {}
                    },
                    Some(Err(e)) => {
                        debug!(connection = %id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    events.on_close(id);
    handle.close();
    drop(handle);

    let abort = writer.abort_handle();
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(connection = %id, error = %e, "Writer task ended abnormally"),
        Err(_) => {
            debug!(connection = %id, "Writer did not drain in time");
            abort.abort();
        }
    }

    debug!(connection = %id, "WebSocket disconnected");
}
