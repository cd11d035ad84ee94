//! # impulse-transport
//!
//! WebSocket adapters for the Impulse signaling relay.
//!
//! Every adapter turns a socket into a [`ChannelHandle`] plus the four
//! lifecycle callbacks of [`impulse_core::ConnectionEvents`]:
//!
//! - **axum** - [`websocket::serve_socket`] for sockets upgraded by an axum route
//! - **tokio-tungstenite** - [`WebSocketListener`], a bare TCP listener (feature `websocket`)
//!
//! ```rust,ignore
//! use impulse_transport::{Transport, WebSocketListener};
//!
//! let listener = WebSocketListener::bind(addr, SessionConfig::default()).await?;
//! listener.serve(relay, shutdown).await?;
//! ```

pub mod handle;
pub mod session;
pub mod traits;
pub mod websocket;

#[cfg(feature = "websocket")]
pub mod listener;

pub use handle::{ChannelHandle, Outbound};
pub use session::{run_session, SessionConfig};
pub use traits::{Transport, TransportError};

#[cfg(feature = "websocket")]
pub use listener::WebSocketListener;
