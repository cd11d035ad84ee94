//! Heartbeat monitor.
//!
//! One global tick walks a snapshot of the open connections. Each tick pings
//! every connection and counts a missed pong for each one that has been
//! waiting longer than the no-pong threshold. A connection whose miss count
//! exceeds the configured bound is closed and torn down through the
//! registry, exactly like an ordinary close.
//!
//! Per-connection state lives in the registry entry and is only touched
//! while that entry is locked, so a tick can never operate on a connection
//! that has already been torn down.

use crate::connection::{ConnectionHandle, ConnectionId, Liveness, LivenessState};
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Heartbeat configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// How long a ping may go unanswered before it counts as missed.
    pub no_pong_threshold: Duration,
    /// Missed pongs tolerated before eviction.
    pub max_missed_pongs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            no_pong_threshold: Duration::from_secs(10),
            max_missed_pongs: 1,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections pinged.
    pub pinged: usize,
    /// Connections evicted for missing pongs.
    pub evicted: Vec<ConnectionId>,
    /// Connections evicted because the ping could not be queued.
    pub failed: Vec<ConnectionId>,
    /// Connections skipped because teardown had already started.
    pub skipped: usize,
}

enum Verdict {
    Pinged,
    Unresponsive,
    PingFailed,
    Skipped,
}

/// Drives liveness checks over a [`ConnectionRegistry`].
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, config: HeartbeatConfig) -> Self {
        Self { registry, config }
    }

    /// The monitor's configuration.
    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Run one liveness pass at `now`.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        for id in self.registry.ids() {
            let verdict = self
                .registry
                .with_liveness(id, |liveness, handle| self.check(id, liveness, handle, now));

            match verdict {
                // Closed between the snapshot and the check.
                None => {}
                Some(Verdict::Pinged) => report.pinged += 1,
                Some(Verdict::Skipped) => report.skipped += 1,
                Some(Verdict::Unresponsive) => {
                    warn!(
                        connection = %id,
                        username = self.registry.username_of(id).as_deref().unwrap_or("-"),
                        "Evicting unresponsive connection"
                    );
                    if self.registry.evict(id) {
                        report.evicted.push(id);
                    }
                }
                Some(Verdict::PingFailed) => {
                    if self.registry.evict(id) {
                        report.failed.push(id);
                    }
                }
            }
        }

        trace!(
            pinged = report.pinged,
            evicted = report.evicted.len(),
            "Heartbeat tick"
        );
        report
    }

    fn check(
        &self,
        id: ConnectionId,
        liveness: &mut Liveness,
        handle: &Arc<dyn ConnectionHandle>,
        now: Instant,
    ) -> Verdict {
        if liveness.is_closing() {
            return Verdict::Skipped;
        }

        if liveness.state == LivenessState::AwaitingPong {
            let waited = liveness
                .last_ping_sent_at
                .map(|sent| now.saturating_duration_since(sent))
                .unwrap_or_default();
            if waited >= self.config.no_pong_threshold {
                liveness.missed_pongs += 1;
            }
            if liveness.missed_pongs > self.config.max_missed_pongs {
                debug!(connection = %id, missed_pongs = liveness.missed_pongs, "Pong bound exceeded");
                liveness.state = LivenessState::Closing;
                return Verdict::Unresponsive;
            }
        }

        if !handle.is_open() {
            debug!(connection = %id, "Transport already closed");
            liveness.state = LivenessState::Closing;
            return Verdict::PingFailed;
        }

        match handle.ping() {
            Ok(()) => {
                liveness.last_ping_sent_at = Some(now);
                liveness.state = LivenessState::AwaitingPong;
                Verdict::Pinged
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "Ping failed");
                liveness.state = LivenessState::Closing;
                Verdict::PingFailed
            }
        }
    }

    /// Record a pong received at `now`.
    ///
    /// Returns the measured round trip in milliseconds, or `None` if the
    /// connection is gone.
    pub fn on_pong(&self, id: ConnectionId, now: Instant) -> Option<u64> {
        self.registry.with_liveness(id, |liveness, _| {
            let rtt = liveness
                .last_ping_sent_at
                .map(|sent| now.saturating_duration_since(sent).as_millis() as u64)
                .unwrap_or_default();
            liveness.round_trip_millis = rtt;
            liveness.missed_pongs = 0;
            if !liveness.is_closing() {
                liveness.state = LivenessState::Alive;
            }
            trace!(connection = %id, rtt_ms = rtt, "Pong received");
            rtt
        })
    }

    /// Tick every `interval` until `shutdown` is cancelled.
    ///
    /// The first tick fires one interval after start. `on_tick` sees the
    /// report of every pass.
    pub async fn run(&self, shutdown: CancellationToken, mut on_tick: impl FnMut(&TickReport)) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        debug!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_missed_pongs = self.config.max_missed_pongs,
            "Heartbeat started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Heartbeat stopped");
                    break;
                }
                _ = interval.tick() => {
                    // A late tick still stamps pings with the actual send time.
                    let report = self.tick(tokio::time::Instant::now().into_std());
                    on_tick(&report);
                }
            }
        }
    }
}
