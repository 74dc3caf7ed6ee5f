//! Hub telemetry for observability.
//!
//! Lock-free atomic counters updated by the router and the per-client
//! dispatchers, plus a point-in-time snapshot for display.
//!
//! # Architecture
//!
//! ```text
//! Router ───────┐
//!               ├──► HubMetrics ─────► TelemetrySnapshot ─────► Views
//! Dispatchers ──┘    (atomic counters)  (point-in-time copy)     (CLI, logs)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use location_client::telemetry::HubMetrics;
//!
//! let metrics = HubMetrics::new();
//! metrics.event_received();
//! metrics.report_routed();
//!
//! let snapshot = metrics.snapshot();
//! println!("Reports routed: {}", snapshot.reports_routed);
//! ```

mod metrics;
mod snapshot;

pub use metrics::HubMetrics;
pub use snapshot::TelemetrySnapshot;
