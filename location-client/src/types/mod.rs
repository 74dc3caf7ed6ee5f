//! Value types shared by every layer of the client core.
//!
//! Nothing in here owns state or talks to the positioning service. These are
//! the payloads that flow between the engine layer, the router, and the
//! callbacks a client registers:
//!
//! - **Identifiers**: [`ClientId`], [`RequestId`], [`EngineGeofenceId`]
//! - **Masks**: [`EngineMask`], [`RunningEngines`], [`GeofenceBreachMask`],
//!   [`CapabilitiesMask`], [`LocationFlags`]
//! - **Reports**: [`Location`], [`GnssLocation`], [`GnssSv`], [`GnssData`],
//!   [`GnssMeasurements`], [`GnssSvPoly`], [`NmeaSentence`]
//! - **Outcomes**: [`LocationResponse`], [`BatchingStatus`]

mod ids;
mod masks;
mod reports;

pub(crate) use ids::IdSequence;
pub use ids::{ClientId, EngineGeofenceId, RequestId};
pub use masks::{
    CapabilitiesMask, EngineKind, EngineMask, GeofenceBreachMask, LocationFlags, RunningEngines,
};
pub use reports::{
    BatchingStatus, Constellation, GnssData, GnssEnergyConsumed, GnssLocation, GnssMeasurement,
    GnssMeasurements, GnssSv, GnssSvPoly, LeapSecondInfo, Location, LocationResponse,
    LocationSystemInfo, NmeaSentence,
};
