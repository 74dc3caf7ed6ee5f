//! Location client - session and geofence coordination over a positioning service.
//!
//! This library lets a process hold tracking and batching sessions and any
//! number of geofences against a shared positioning service, while reports
//! from one or more position engines (standard, dead-reckoning, precise) and
//! asynchronous responses arrive from threads the caller does not control.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────── LocationClient ─────────────────────────┐
//!  client call ──► │ Mutex ─┬─ SessionStateMachine (tracking axis, batching axis)    │
//!                  │        └─ GeofenceRegistry (generation-checked arena)           │
//!                  │              │ engine requests          │ deliveries            │
//!                  └──────────────┼──────────────────────────┼───────────────────────┘
//!                                 ▼                          ▼
//!                       PositioningService          ResponseDispatcher ──► callbacks
//!                                 │                          ▲
//!                            EngineEvent                     │
//!                                 ▼                          │
//!                        EngineReportRouter ─────────────────┘
//! ```
//!
//! - [`client`]: [`LocationHub`] and the [`LocationClient`] surface
//! - [`session`]: start/stop transitions, rollback, identical-request suppression
//! - [`geofence`]: geofence identity, state and modification semantics
//! - [`router`]: event demultiplexing and engine stream selection
//! - [`dispatcher`]: ordered, epoch-gated callback delivery
//! - [`engine`]: the positioning service contract and a simulated service
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use location_client::{HubConfig, LocationClient, LocationHub};
//! use location_client::engine::{SimulatedEngine, SimulatedEngineConfig};
//!
//! let (engine, events) = SimulatedEngine::channel(SimulatedEngineConfig::default());
//! let hub = LocationHub::start(HubConfig::default(), engine.clone(), events)?;
//!
//! let client = LocationClient::new(&hub, None)?;
//! client.start_position_session(
//!     1000,
//!     0,
//!     Some(Arc::new(|loc| println!("{:.6}, {:.6}", loc.latitude, loc.longitude))),
//!     None,
//! );
//! ```

pub mod callbacks;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod geofence;
mod outbox;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod types;

pub use callbacks::{ReportCallbackSet, ReportKind};
pub use client::{LocationClient, LocationHub};
pub use config::{ClientConfig, HubConfig, RouterConfig};
pub use error::{ConfigError, LocationError};
pub use geofence::{Geofence, GeofenceState};
pub use session::{BatchingParams, SessionAxis, SessionState, TrackingParams};
pub use types::{Location, LocationResponse};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
