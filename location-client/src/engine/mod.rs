//! Positioning service contract.
//!
//! The client core never computes positions. It hands configuration intents
//! to an injected [`PositioningService`] and consumes the service's
//! [`EngineEvent`] stream through the router. The service's lifecycle is
//! independent of any client: it is created once, shared by the hub, and
//! outlives every client built on top of it.
//!
//! # Architecture
//!
//! ```text
//! LocationClient ──submit(EngineRequest)──► PositioningService
//!       ▲                                          │
//!       │                                   EngineEvent (mpsc)
//!       │                                          ▼
//!  ResponseDispatcher ◄──────────────── EngineReportRouter
//! ```
//!
//! [`SimulatedEngine`] is a self-contained implementation used by the tests
//! and the `locctl` demo.

mod protocol;
mod simulated;

pub use protocol::{
    EngineCommand, EngineEvent, EngineRequest, EngineResponse, GeofenceResult, GeofenceSpec,
    GeofenceTarget, TrackingReport,
};
pub use simulated::{SimulatedEngine, SimulatedEngineConfig};

/// The positioning service a hub is built on.
///
/// Implementations answer asynchronously by emitting [`EngineEvent`]s on the
/// channel handed to [`LocationHub::start`](crate::client::LocationHub::start).
pub trait PositioningService: Send + Sync + 'static {
    /// Accept a request. Must not block; clients call this while holding
    /// their state lock.
    fn submit(&self, request: EngineRequest);

    /// Name for logs.
    fn name(&self) -> &str {
        "positioning-service"
    }
}
