//! In-memory doubles shared by the unit tests.

use crate::audit::{AuditError, AuditSink};
use crate::connection::{ConnectionError, ConnectionHandle, ConnectionId};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A connection that records everything the core asks of it.
pub struct MockConnection {
    id: ConnectionId,
    sent: Mutex<Vec<Bytes>>,
    pings: AtomicUsize,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            sent: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Payloads received so far, as text.
    pub fn received(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make every following send fail as if the socket broke.
    pub fn break_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

impl ConnectionHandle for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::SendFailed("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn ping(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

/// An audit sink that keeps every record in memory.
#[derive(Default)]
pub struct RecordingAudit {
    records: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingAudit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Recorded `(identity, action)` pairs.
    pub fn records(&self) -> Vec<(String, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, identity: &str, action: &str, _timestamp: u64) -> Result<(), AuditError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("disk full".into()));
        }
        self.records
            .lock()
            .unwrap()
            .push((identity.to_string(), action.to_string()));
        Ok(())
    }
}
