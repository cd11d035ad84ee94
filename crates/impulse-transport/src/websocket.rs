//! axum WebSocket adapter.

use crate::handle::Outbound;
use crate::session::{payload_frame, run_session, Inbound, SessionConfig, WsMessage};
use axum::extract::ws::{Message, WebSocket};
use impulse_core::ConnectionEvents;
use impulse_protocol::Encoding;
use std::sync::Arc;

impl WsMessage for Message {
    fn into_inbound(self) -> Inbound {
        match self {
            Message::Text(text) => Inbound::Data(text.into_bytes(), Encoding::Json),
            Message::Binary(data) => Inbound::Data(data, Encoding::MessagePack),
            Message::Pong(_) => Inbound::Pong,
            Message::Close(_) => Inbound::Close,
            Message::Ping(_) => Inbound::Ignored,
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

/// Drive an upgraded axum socket until it closes.
pub async fn serve_socket(
    socket: WebSocket,
    remote_address: String,
    events: Arc<dyn ConnectionEvents>,
    config: SessionConfig,
) {
    run_session(socket, remote_address, events, config).await;
}
