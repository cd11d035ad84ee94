//! Standalone WebSocket listener built on tokio-tungstenite.
//!
//! Serves WebSocket connections on a bare TCP socket, without an HTTP
//! router in front.

use crate::handle::Outbound;
use crate::session::{payload_frame, run_session, Inbound, SessionConfig, WsMessage};
use crate::traits::{Transport, TransportError};
use async_trait::async_trait;
use impulse_core::ConnectionEvents;
use impulse_protocol::Encoding;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::{protocol::WebSocketConfig, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl WsMessage for Message {
    fn into_inbound(self) -> Inbound {
        match self {
            Message::Text(text) => Inbound::Data(text.into_bytes(), Encoding::Json),
            Message::Binary(data) => Inbound::Data(data, Encoding::MessagePack),
            Message::Pong(_) => Inbound::Pong,
            Message::Close(_) => Inbound::Close,
            Message::Ping(_) | Message::Frame(_) => Inbound::Ignored,
        }
    }

    fn from_outbound(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Payload(payload) => match payload_frame(payload) {
                Ok(text) => Message::Text(text),
                Err(data) => Message::Binary(data),
            },
            Outbound::Ping => Message::Ping(Vec::new()),
            Outbound::Close => Message::Close(None),
        }
    }
}

fn websocket_config(config: &SessionConfig) -> WebSocketConfig {
    let limit = config.transport_limit();
    let mut websocket = WebSocketConfig::default();
    websocket.max_message_size = Some(limit);
    websocket.max_frame_size = Some(limit);
    websocket
}

/// WebSocket listener.
pub struct WebSocketListener {
    listener: TcpListener,
    config: SessionConfig,
}

impl WebSocketListener {
    /// Bind a listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(addr: SocketAddr, config: SessionConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket listener bound to {}", addr);
        Ok(Self { listener, config })
    }

    /// Get the local address this listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Transport for WebSocketListener {
    async fn serve(
        &self,
        events: Arc<dyn ConnectionEvents>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("WebSocket listener stopping");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept TCP connection");
                            continue;
                        }
                    };

                    let events = events.clone();
                    let config = self.config;
                    tokio::spawn(async move {
                        let websocket = websocket_config(&config);
                        match accept_async_with_config(stream, Some(websocket)).await {
                            Ok(socket) => {
                                run_session(socket, addr.to_string(), events, config).await;
                            }
                            Err(e) => {
                                let e = TransportError::Handshake(e.to_string());
                                warn!(remote = %addr, error = %e, "Rejected connection");
                            }
                        }
                    });
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
