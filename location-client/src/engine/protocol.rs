//! Messages exchanged with the positioning service.
//!
//! Requests flow from clients to the service through
//! [`PositioningService::submit`](super::PositioningService::submit); everything
//! the service produces comes back as [`EngineEvent`]s on one channel consumed
//! by the router.

use std::sync::Arc;

use crate::geofence::{GeofenceHandle, GeofenceRegion, GeofenceTriggers};
use crate::session::{BatchingParams, EffectiveParams, TrackingParams};
use crate::types::{
    BatchingStatus, CapabilitiesMask, ClientId, EngineGeofenceId, GeofenceBreachMask, GnssData,
    GnssEnergyConsumed, GnssLocation, GnssMeasurements, GnssSv, GnssSvPoly, Location,
    LocationResponse, LocationSystemInfo, NmeaSentence, RequestId, RunningEngines,
};

// =============================================================================
// Requests
// =============================================================================

/// A configuration intent addressed to the positioning service.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    /// Requesting client, or [`ClientId::HUB`] for hub housekeeping.
    pub client_id: ClientId,
    /// Echoed back in the matching [`EngineEvent::Response`].
    pub request_id: RequestId,
    pub command: EngineCommand,
}

/// What the client wants the service to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Answered with [`EngineEvent::Capabilities`].
    QueryCapabilities,
    /// Start or reconfigure the client's tracking session.
    StartTracking(TrackingParams),
    StopTracking,
    /// Start or replace the client's batching session.
    StartBatching(BatchingParams),
    StopBatching,
    AddGeofences(Vec<GeofenceSpec>),
    RemoveGeofences(Vec<GeofenceTarget>),
    ModifyGeofences(Vec<(GeofenceTarget, GeofenceTriggers)>),
    PauseGeofences(Vec<GeofenceTarget>),
    ResumeGeofences(Vec<GeofenceTarget>),
    /// Release engine geofences nobody owns any more. Not answered.
    EvictGeofences(Vec<EngineGeofenceId>),
    UpdateNetworkAvailability(bool),
    /// Answered with a response followed by [`EngineEvent::EnergyConsumed`].
    QueryEnergyConsumed,
}

impl EngineCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::QueryCapabilities => "query_capabilities",
            EngineCommand::StartTracking(_) => "start_tracking",
            EngineCommand::StopTracking => "stop_tracking",
            EngineCommand::StartBatching(_) => "start_batching",
            EngineCommand::StopBatching => "stop_batching",
            EngineCommand::AddGeofences(_) => "add_geofences",
            EngineCommand::RemoveGeofences(_) => "remove_geofences",
            EngineCommand::ModifyGeofences(_) => "modify_geofences",
            EngineCommand::PauseGeofences(_) => "pause_geofences",
            EngineCommand::ResumeGeofences(_) => "resume_geofences",
            EngineCommand::EvictGeofences(_) => "evict_geofences",
            EngineCommand::UpdateNetworkAvailability(_) => "update_network_availability",
            EngineCommand::QueryEnergyConsumed => "query_energy_consumed",
        }
    }
}

/// A geofence to add.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceSpec {
    pub handle: GeofenceHandle,
    pub region: GeofenceRegion,
    pub triggers: GeofenceTriggers,
}

/// A geofence the engine already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeofenceTarget {
    pub handle: GeofenceHandle,
    pub engine_id: EngineGeofenceId,
}

// =============================================================================
// Events
// =============================================================================

/// Asynchronous answer to an [`EngineRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    /// Answer to a session start.
    Session {
        response: LocationResponse,
        /// Rates the engine will actually use, when accepted.
        effective: Option<EffectiveParams>,
    },
    /// Per-geofence answer to a geofence command.
    Geofences(Vec<GeofenceResult>),
    /// Answer to anything else.
    Plain(LocationResponse),
}

impl EngineResponse {
    /// Overall outcome; a geofence answer succeeds if any item did.
    pub fn outcome(&self) -> LocationResponse {
        match self {
            EngineResponse::Session { response, .. } | EngineResponse::Plain(response) => *response,
            EngineResponse::Geofences(results) => {
                if results.iter().any(|r| r.response.is_success()) {
                    LocationResponse::Success
                } else {
                    LocationResponse::UnknownFailure
                }
            }
        }
    }
}

/// Outcome for one geofence of a geofence command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeofenceResult {
    pub handle: GeofenceHandle,
    pub response: LocationResponse,
    /// Assigned by the engine on a successful add.
    pub engine_id: Option<EngineGeofenceId>,
}

/// Periodic report of a tracking session.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingReport {
    /// One fix per stream the engine layer produced: one per running engine,
    /// plus a fused entry when two or more engines run.
    Positions(Vec<GnssLocation>),
    SvList(Vec<GnssSv>),
    Nmea(NmeaSentence),
    GnssData(GnssData),
    Measurements(GnssMeasurements),
    SvPoly(GnssSvPoly),
}

/// Everything the positioning service emits.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The set of running engines changed.
    EnginesChanged(RunningEngines),
    Response {
        client_id: ClientId,
        request_id: RequestId,
        response: EngineResponse,
    },
    Capabilities {
        client_id: ClientId,
        capabilities: CapabilitiesMask,
    },
    /// Tracking report for `target`'s session, or for every tracking client
    /// when `target` is `None`. Passive listeners receive targeted reports
    /// too.
    Report {
        target: Option<ClientId>,
        report: Arc<TrackingReport>,
    },
    Batch {
        client_id: ClientId,
        locations: Vec<Location>,
        status: BatchingStatus,
    },
    /// Broadcast; each client resolves the engine ids it owns.
    GeofenceBreach {
        engine_ids: Vec<EngineGeofenceId>,
        location: Location,
        breach: GeofenceBreachMask,
        timestamp: u64,
    },
    EnergyConsumed {
        client_id: ClientId,
        energy: GnssEnergyConsumed,
    },
    /// Broadcast to clients with a system info listener.
    SystemInfo(LocationSystemInfo),
}

impl EngineEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::EnginesChanged(_) => "engines_changed",
            EngineEvent::Response { .. } => "response",
            EngineEvent::Capabilities { .. } => "capabilities",
            EngineEvent::Report { .. } => "report",
            EngineEvent::Batch { .. } => "batch",
            EngineEvent::GeofenceBreach { .. } => "geofence_breach",
            EngineEvent::EnergyConsumed { .. } => "energy_consumed",
            EngineEvent::SystemInfo(_) => "system_info",
        }
    }
}
