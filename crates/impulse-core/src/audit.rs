//! Audit sink for routed signals.
//!
//! Every signal the router delivers is reported as
//! `(target identity, action, timestamp)`. Recording is fire-and-forget:
//! the router logs failures and carries on.

use thiserror::Error;
use tracing::info;

/// Audit errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not accept the record.
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Record one routed signal. `timestamp` is Unix time in milliseconds.
    fn record(&self, identity: &str, action: &str, timestamp: u64) -> Result<(), AuditError>;
}

/// Writes audit records as tracing events on the `impulse::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, identity: &str, action: &str, timestamp: u64) -> Result<(), AuditError> {
        info!(
            target: "impulse::audit",
            identity = %identity,
            action = %action,
            timestamp,
            "Signal routed"
        );
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _identity: &str, _action: &str, _timestamp: u64) -> Result<(), AuditError> {
        Ok(())
    }
}
