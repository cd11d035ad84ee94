//! # impulse-core
//!
//! Connection presence, topic fan-out, signal routing and liveness for the
//! Impulse signaling relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Usernames to live receiver connections, plus liveness metadata
//! - **Broker** - Topic publish/subscribe, independent of usernames
//! - **Router** - Turns `register`/`signal` messages into registry and broker calls
//! - **Heartbeat** - Global ping tick that evicts silent connections
//! - **Relay** - Wires the above together behind four transport callbacks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Router    │────▶│   Broker    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   ▲
//!        ▼                   ▼                   │
//! ┌─────────────┐     ┌─────────────┐            │
//! │  Heartbeat  │────▶│  Registry   │────────────┘
//! └─────────────┘     └─────────────┘
//! ```
//!
//! Every teardown (close, eviction, failed send) goes through
//! [`ConnectionRegistry::close`], which always unsubscribes the connection
//! from every topic.

pub mod audit;
pub mod broker;
pub mod connection;
pub mod directory;
pub mod heartbeat;
pub mod registry;
pub mod relay;
pub mod router;
pub mod routing;
pub mod topic;

#[cfg(test)]
mod testing;

pub use audit::{AuditError, AuditSink, NullAuditSink, TracingAuditSink};
pub use broker::{BrokerConfig, BrokerError, BrokerStats, PublishReport, TopicBroker};
pub use connection::{
    ConnectionError, ConnectionHandle, ConnectionId, ConnectionInfo, LivenessState,
};
pub use directory::{AccountDirectory, MemoryDirectory};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, TickReport};
pub use registry::{ConnectionRegistry, RegisterOutcome, RegistryError, RegistryStats};
pub use relay::{ConnectionEvents, Relay, RelayConfig, RelayStats};
pub use router::{DropReason, RouteOutcome, RouterConfig, SignalReport, SignalRouter};
pub use routing::RoutingMode;
