//! Point-in-time copy of hub counters.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Snapshot of [`HubMetrics`](super::HubMetrics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    /// Time since the metrics were created.
    pub uptime: Duration,
    pub events_received: u64,
    pub reports_routed: u64,
    pub reports_dropped_stale: u64,
    pub responses_delivered: u64,
    pub breaches_delivered: u64,
    pub callback_panics: u64,
    pub orphan_evictions: u64,
    /// Clients created and not yet dropped.
    pub active_clients: u64,
}

impl TelemetrySnapshot {
    /// Engine events per second over the whole uptime.
    pub fn events_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.events_received as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} routed={} stale={} responses={} breaches={} panics={} evicted={} clients={}",
            self.events_received,
            self.reports_routed,
            self.reports_dropped_stale,
            self.responses_delivered,
            self.breaches_delivered,
            self.callback_panics,
            self.orphan_evictions,
            self.active_clients,
        )
    }
}
