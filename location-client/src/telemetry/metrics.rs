//! Atomic counters shared by the router and the dispatchers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::TelemetrySnapshot;

/// Hub-wide counters.
///
/// All updates use relaxed ordering; the counters are independent and only
/// read for display.
#[derive(Debug)]
pub struct HubMetrics {
    started_at: Instant,
    events_received: AtomicU64,
    reports_routed: AtomicU64,
    reports_dropped_stale: AtomicU64,
    responses_delivered: AtomicU64,
    breaches_delivered: AtomicU64,
    callback_panics: AtomicU64,
    orphan_evictions: AtomicU64,
    clients_created: AtomicU64,
    clients_dropped: AtomicU64,
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HubMetrics {
    /// Create a metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            events_received: AtomicU64::new(0),
            reports_routed: AtomicU64::new(0),
            reports_dropped_stale: AtomicU64::new(0),
            responses_delivered: AtomicU64::new(0),
            breaches_delivered: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            orphan_evictions: AtomicU64::new(0),
            clients_created: AtomicU64::new(0),
            clients_dropped: AtomicU64::new(0),
        }
    }

    /// An engine event was taken off the event channel.
    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A report was queued for a client callback.
    pub fn report_routed(&self) {
        self.reports_routed.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` reports were queued for client callbacks.
    pub fn reports_routed(&self, count: usize) {
        self.reports_routed.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// A queued report was discarded because its session ended.
    pub fn report_dropped_stale(&self) {
        self.reports_dropped_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// A response callback ran.
    pub fn response_delivered(&self) {
        self.responses_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// A breach callback ran.
    pub fn breach_delivered(&self) {
        self.breaches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// A client callback panicked.
    pub fn callback_panicked(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Engine geofences were evicted because no client claimed them.
    pub fn orphans_evicted(&self, count: usize) {
        self.orphan_evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn client_created(&self) {
        self.clients_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_dropped(&self) {
        self.clients_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let clients_created = self.clients_created.load(Ordering::Relaxed);
        let clients_dropped = self.clients_dropped.load(Ordering::Relaxed);

        TelemetrySnapshot {
            uptime: self.started_at.elapsed(),
            events_received: self.events_received.load(Ordering::Relaxed),
            reports_routed: self.reports_routed.load(Ordering::Relaxed),
            reports_dropped_stale: self.reports_dropped_stale.load(Ordering::Relaxed),
            responses_delivered: self.responses_delivered.load(Ordering::Relaxed),
            breaches_delivered: self.breaches_delivered.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            orphan_evictions: self.orphan_evictions.load(Ordering::Relaxed),
            active_clients: clients_created.saturating_sub(clients_dropped),
        }
    }
}
