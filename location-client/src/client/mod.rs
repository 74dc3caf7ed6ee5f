//! Client instances and the hub they share.
//!
//! A [`LocationHub`] owns the injected positioning service and the router
//! task. Each [`LocationClient`] built on it owns one session state machine
//! and one geofence registry behind a single lock, plus its own dispatcher
//! thread.
//!
//! # Example
//!
//! ```ignore
//! use location_client::client::{LocationClient, LocationHub};
//! use location_client::config::HubConfig;
//! use location_client::engine::{SimulatedEngine, SimulatedEngineConfig};
//!
//! let (engine, events) = SimulatedEngine::channel(SimulatedEngineConfig::default());
//! let hub = LocationHub::start(HubConfig::default(), engine, events)?;
//! let client = LocationClient::new(&hub, None)?;
//! ```

mod api;
mod instance;
mod hub;

pub use api::LocationClient;
pub(crate) use hub::HubShared;
pub(crate) use instance::ResponseMatch;
pub use hub::LocationHub;
