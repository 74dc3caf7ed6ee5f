//! Client callback types and the per-session report callback table.
//!
//! Every callback is a shared trait object so that the session state, the
//! router and the dispatcher can hold it without copying closures. Report
//! callbacks for a tracking session live in a [`ReportCallbackSet`], a fixed
//! table indexed by [`ReportKind`]; an empty slot means that report kind is
//! not delivered to the client.

use std::fmt;
use std::sync::Arc;

use crate::geofence::Geofence;
use crate::types::{
    BatchingStatus, CapabilitiesMask, GeofenceBreachMask, GnssData, GnssEnergyConsumed,
    GnssLocation, GnssMeasurements, GnssSv, GnssSvPoly, Location, LocationResponse,
    LocationSystemInfo, NmeaSentence,
};

// =============================================================================
// Callback aliases
// =============================================================================

/// Outcome of a single client call.
pub type ResponseCallback = Arc<dyn Fn(LocationResponse) + Send + Sync>;

/// Capabilities of the positioning service, fired at most once per client.
pub type CapabilitiesCallback = Arc<dyn Fn(CapabilitiesMask) + Send + Sync>;

/// Basic position fix of the default stream.
pub type LocationCallback = Arc<dyn Fn(&Location) + Send + Sync>;

/// Rich position report of the default stream.
pub type GnssLocationCallback = Arc<dyn Fn(&GnssLocation) + Send + Sync>;

/// One report per requested engine stream.
pub type EngineLocationsCallback = Arc<dyn Fn(&[GnssLocation]) + Send + Sync>;

/// Satellite vehicles in view.
pub type SvListCallback = Arc<dyn Fn(&[GnssSv]) + Send + Sync>;

/// NMEA sentence.
pub type NmeaCallback = Arc<dyn Fn(&NmeaSentence) + Send + Sync>;

/// Jammer and AGC data.
pub type GnssDataCallback = Arc<dyn Fn(&GnssData) + Send + Sync>;

/// Raw measurements.
pub type MeasurementsCallback = Arc<dyn Fn(&GnssMeasurements) + Send + Sync>;

/// Satellite orbit polynomials.
pub type SvPolyCallback = Arc<dyn Fn(&GnssSvPoly) + Send + Sync>;

/// Batched locations and the batching status.
pub type BatchingCallback = Arc<dyn Fn(&[Location], BatchingStatus) + Send + Sync>;

/// Geofences breached together, the triggering fix, breach type and timestamp.
pub type GeofenceBreachCallback =
    Arc<dyn Fn(&[Geofence], &Location, GeofenceBreachMask, u64) + Send + Sync>;

/// Per-geofence outcomes of one geofence call.
pub type CollectiveResponseCallback = Arc<dyn Fn(&[(Geofence, LocationResponse)]) + Send + Sync>;

/// GNSS energy consumption.
pub type EnergyConsumedCallback = Arc<dyn Fn(&GnssEnergyConsumed) + Send + Sync>;

/// System information updates.
pub type SystemInfoCallback = Arc<dyn Fn(&LocationSystemInfo) + Send + Sync>;

// =============================================================================
// Report kinds
// =============================================================================

/// Report kinds a tracking session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// [`Location`] of the default stream.
    Location,
    /// [`GnssLocation`] of the default stream.
    GnssLocation,
    /// One [`GnssLocation`] per requested engine.
    EngineLocations,
    /// [`GnssSv`] list.
    SvList,
    /// [`NmeaSentence`].
    Nmea,
    /// [`GnssData`].
    GnssData,
    /// [`GnssMeasurements`].
    Measurements,
    /// [`GnssSvPoly`].
    SvPoly,
}

impl ReportKind {
    /// Number of report kinds.
    pub const COUNT: usize = 8;

    /// Every report kind, in table order.
    pub const ALL: [ReportKind; Self::COUNT] = [
        ReportKind::Location,
        ReportKind::GnssLocation,
        ReportKind::EngineLocations,
        ReportKind::SvList,
        ReportKind::Nmea,
        ReportKind::GnssData,
        ReportKind::Measurements,
        ReportKind::SvPoly,
    ];

    /// Slot index in a [`ReportCallbackSet`].
    pub const fn index(self) -> usize {
        match self {
            ReportKind::Location => 0,
            ReportKind::GnssLocation => 1,
            ReportKind::EngineLocations => 2,
            ReportKind::SvList => 3,
            ReportKind::Nmea => 4,
            ReportKind::GnssData => 5,
            ReportKind::Measurements => 6,
            ReportKind::SvPoly => 7,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportKind::Location => "location",
            ReportKind::GnssLocation => "gnss_location",
            ReportKind::EngineLocations => "engine_locations",
            ReportKind::SvList => "sv_list",
            ReportKind::Nmea => "nmea",
            ReportKind::GnssData => "gnss_data",
            ReportKind::Measurements => "measurements",
            ReportKind::SvPoly => "sv_poly",
        };
        f.write_str(name)
    }
}

/// A report callback tagged with its kind.
#[derive(Clone)]
pub enum ReportCallback {
    /// See [`ReportKind::Location`].
    Location(LocationCallback),
    /// See [`ReportKind::GnssLocation`].
    GnssLocation(GnssLocationCallback),
    /// See [`ReportKind::EngineLocations`].
    EngineLocations(EngineLocationsCallback),
    /// See [`ReportKind::SvList`].
    SvList(SvListCallback),
    /// See [`ReportKind::Nmea`].
    Nmea(NmeaCallback),
    /// See [`ReportKind::GnssData`].
    GnssData(GnssDataCallback),
    /// See [`ReportKind::Measurements`].
    Measurements(MeasurementsCallback),
    /// See [`ReportKind::SvPoly`].
    SvPoly(SvPolyCallback),
}

impl ReportCallback {
    /// The kind of report this callback receives.
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportCallback::Location(_) => ReportKind::Location,
            ReportCallback::GnssLocation(_) => ReportKind::GnssLocation,
            ReportCallback::EngineLocations(_) => ReportKind::EngineLocations,
            ReportCallback::SvList(_) => ReportKind::SvList,
            ReportCallback::Nmea(_) => ReportKind::Nmea,
            ReportCallback::GnssData(_) => ReportKind::GnssData,
            ReportCallback::Measurements(_) => ReportKind::Measurements,
            ReportCallback::SvPoly(_) => ReportKind::SvPoly,
        }
    }
}

impl fmt::Debug for ReportCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReportCallback({})", self.kind())
    }
}

// =============================================================================
// Callback set
// =============================================================================

/// Optional callback per report kind for one tracking session.
#[derive(Clone, Default)]
pub struct ReportCallbackSet {
    slots: [Option<ReportCallback>; ReportKind::COUNT],
}

impl ReportCallbackSet {
    /// Empty set. Starting a session with it is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `callback` in the slot of its kind, replacing any previous one.
    pub fn set(&mut self, callback: ReportCallback) {
        let index = callback.kind().index();
        self.slots[index] = Some(callback);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, callback: ReportCallback) -> Self {
        self.set(callback);
        self
    }

    /// Subscribe to basic fixes.
    pub fn with_location(self, callback: LocationCallback) -> Self {
        self.with(ReportCallback::Location(callback))
    }

    /// Subscribe to rich fixes.
    pub fn with_gnss_location(self, callback: GnssLocationCallback) -> Self {
        self.with(ReportCallback::GnssLocation(callback))
    }

    /// Subscribe to per-engine fixes.
    pub fn with_engine_locations(self, callback: EngineLocationsCallback) -> Self {
        self.with(ReportCallback::EngineLocations(callback))
    }

    /// Subscribe to SV lists.
    pub fn with_sv_list(self, callback: SvListCallback) -> Self {
        self.with(ReportCallback::SvList(callback))
    }

    /// Subscribe to NMEA sentences.
    pub fn with_nmea(self, callback: NmeaCallback) -> Self {
        self.with(ReportCallback::Nmea(callback))
    }

    /// Subscribe to jammer/AGC data.
    pub fn with_gnss_data(self, callback: GnssDataCallback) -> Self {
        self.with(ReportCallback::GnssData(callback))
    }

    /// Subscribe to raw measurements.
    pub fn with_measurements(self, callback: MeasurementsCallback) -> Self {
        self.with(ReportCallback::Measurements(callback))
    }

    /// Subscribe to SV polynomials.
    pub fn with_sv_poly(self, callback: SvPolyCallback) -> Self {
        self.with(ReportCallback::SvPoly(callback))
    }

    /// Callback registered for `kind`, if any.
    pub fn get(&self, kind: ReportKind) -> Option<&ReportCallback> {
        self.slots[kind.index()].as_ref()
    }

    /// True if `kind` has a callback.
    pub fn wants(&self, kind: ReportKind) -> bool {
        self.get(kind).is_some()
    }

    /// True if no report kind has a callback.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Kinds with a registered callback, in table order.
    pub fn kinds(&self) -> impl Iterator<Item = ReportKind> + '_ {
        self.slots.iter().flatten().map(ReportCallback::kind)
    }
}

impl fmt::Debug for ReportCallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

/// Callbacks accepted by
/// [`start_gnss_session`](crate::client::LocationClient::start_gnss_session).
#[derive(Clone, Default)]
pub struct GnssReportCallbacks {
    pub gnss_location: Option<GnssLocationCallback>,
    pub sv_list: Option<SvListCallback>,
    pub nmea: Option<NmeaCallback>,
    pub gnss_data: Option<GnssDataCallback>,
    pub measurements: Option<MeasurementsCallback>,
}

impl From<GnssReportCallbacks> for ReportCallbackSet {
    fn from(cbs: GnssReportCallbacks) -> Self {
        let mut set = ReportCallbackSet::new();
        if let Some(cb) = cbs.gnss_location {
            set.set(ReportCallback::GnssLocation(cb));
        }
        if let Some(cb) = cbs.sv_list {
            set.set(ReportCallback::SvList(cb));
        }
        if let Some(cb) = cbs.nmea {
            set.set(ReportCallback::Nmea(cb));
        }
        if let Some(cb) = cbs.gnss_data {
            set.set(ReportCallback::GnssData(cb));
        }
        if let Some(cb) = cbs.measurements {
            set.set(ReportCallback::Measurements(cb));
        }
        set
    }
}

/// Callbacks accepted by
/// [`start_engine_session`](crate::client::LocationClient::start_engine_session).
#[derive(Clone, Default)]
pub struct EngineReportCallbacks {
    pub engine_locations: Option<EngineLocationsCallback>,
    pub sv_list: Option<SvListCallback>,
    pub nmea: Option<NmeaCallback>,
    pub gnss_data: Option<GnssDataCallback>,
    pub measurements: Option<MeasurementsCallback>,
    pub sv_poly: Option<SvPolyCallback>,
}

impl From<EngineReportCallbacks> for ReportCallbackSet {
    fn from(cbs: EngineReportCallbacks) -> Self {
        let mut set = ReportCallbackSet::new();
        if let Some(cb) = cbs.engine_locations {
            set.set(ReportCallback::EngineLocations(cb));
        }
        if let Some(cb) = cbs.sv_list {
            set.set(ReportCallback::SvList(cb));
        }
        if let Some(cb) = cbs.nmea {
            set.set(ReportCallback::Nmea(cb));
        }
        if let Some(cb) = cbs.gnss_data {
            set.set(ReportCallback::GnssData(cb));
        }
        if let Some(cb) = cbs.measurements {
            set.set(ReportCallback::Measurements(cb));
        }
        if let Some(cb) = cbs.sv_poly {
            set.set(ReportCallback::SvPoly(cb));
        }
        set
    }
}
