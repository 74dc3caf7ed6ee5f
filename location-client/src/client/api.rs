//! The client-visible surface.

use std::sync::Arc;

use tracing::{debug, info};

use super::instance::ClientCore;
use super::hub::LocationHub;
use crate::callbacks::{
    BatchingCallback, CapabilitiesCallback, CollectiveResponseCallback, EnergyConsumedCallback,
    EngineReportCallbacks, GeofenceBreachCallback, GnssReportCallbacks, LocationCallback,
    ReportCallbackSet, ResponseCallback, SystemInfoCallback,
};
use crate::dispatcher::Delivery;
use crate::engine::EngineCommand;
use crate::error::LocationError;
use crate::geofence::{Geofence, GeofenceState};
use crate::session::{BatchingParams, EffectiveParams, SessionAxis, SessionState, TrackingParams};
use crate::types::{ClientId, EngineMask, LocationResponse};

/// One client of a [`LocationHub`].
///
/// Holds at most one tracking session and one batching session, plus any
/// number of geofences. Every method is callable from any thread and from
/// inside this client's own callbacks. Methods return immediately: `false`
/// means the call was a no-op (a mandatory callback is missing or the
/// parameters say nothing), `true` means it was accepted and its outcome will
/// arrive through the response callback.
///
/// Callbacks run on a dedicated thread per client, one at a time, in the
/// order the events that caused them happened.
///
/// Dropping the client stops both sessions and removes its geofences.
///
/// # Example
///
/// ```ignore
/// let client = LocationClient::new(&hub, None)?;
/// client.start_position_session(
///     1000,
///     0,
///     Some(Arc::new(|loc: &Location| println!("{:.5},{:.5}", loc.latitude, loc.longitude))),
///     Some(Arc::new(|resp| println!("start: {resp}"))),
/// );
/// ```
pub struct LocationClient {
    core: Arc<ClientCore>,
}

impl LocationClient {
    /// Create a client on `hub`.
    ///
    /// If `capabilities` is given it is called once, asynchronously, with the
    /// service's capabilities.
    pub fn new(hub: &LocationHub, capabilities: Option<CapabilitiesCallback>) -> Result<Self, LocationError> {
        let shared = hub.shared();
        if shared.shutdown.is_cancelled() {
            return Err(LocationError::HubShutDown);
        }

        let id = shared.ids.next_client();
        let core = Arc::new(ClientCore::new(id, Arc::clone(shared))?);
        shared.clients.insert(id, Arc::downgrade(&core));
        shared.metrics.client_created();

        if let Some(callback) = capabilities {
            core.apply(|state, outbox| {
                state.capabilities = Some(callback);
                outbox.submit(EngineCommand::QueryCapabilities);
            });
        }

        info!(client_id = %id, "client created");
        Ok(Self { core })
    }

    pub fn id(&self) -> ClientId {
        self.core.id()
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// Track the default location stream.
    ///
    /// `interval_ms == 0` listens passively to other clients' sessions
    /// without starting one. `distance_m == 0` reports by time only.
    pub fn start_position_session(
        &self,
        interval_ms: u32,
        distance_m: u32,
        location: Option<LocationCallback>,
        response: Option<ResponseCallback>,
    ) -> bool {
        let callbacks = match location {
            Some(cb) => ReportCallbackSet::new().with_location(cb),
            None => ReportCallbackSet::new(),
        };
        self.start_tracking(
            TrackingParams::new(interval_ms).with_distance(distance_m),
            callbacks,
            response,
        )
    }

    /// Track the default stream with GNSS detail reports.
    pub fn start_gnss_session(
        &self,
        interval_ms: u32,
        callbacks: GnssReportCallbacks,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.start_tracking(TrackingParams::new(interval_ms), callbacks.into(), response)
    }

    /// Track per-engine streams. Engines that are not running are omitted
    /// from the reports.
    pub fn start_engine_session(
        &self,
        interval_ms: u32,
        engines: EngineMask,
        callbacks: EngineReportCallbacks,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.start_tracking(
            TrackingParams::new(interval_ms).with_engines(engines),
            callbacks.into(),
            response,
        )
    }

    /// Start or replace the tracking session.
    pub fn start_tracking(
        &self,
        params: TrackingParams,
        callbacks: ReportCallbackSet,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.core
            .apply(|state, outbox| state.session.start_tracking(params, callbacks, response, outbox))
    }

    /// Stop the tracking session. No further report of it is delivered,
    /// except one whose callback is already running.
    pub fn stop_position_session(&self) {
        self.core.apply(|state, outbox| state.session.stop_tracking(outbox));
    }

    // -------------------------------------------------------------------------
    // Batching
    // -------------------------------------------------------------------------

    pub fn start_routine_batching(
        &self,
        min_interval_ms: u32,
        min_distance_m: u32,
        batching: Option<BatchingCallback>,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.start_batching(BatchingParams::routine(min_interval_ms, min_distance_m), batching, response)
    }

    /// Batch until `trip_distance_m` has been traveled. The last batch has
    /// status [`BatchingStatus::Done`](crate::types::BatchingStatus::Done)
    /// and ends the session.
    pub fn start_trip_batching(
        &self,
        min_interval_ms: u32,
        trip_distance_m: u32,
        batching: Option<BatchingCallback>,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.start_batching(BatchingParams::trip(min_interval_ms, trip_distance_m), batching, response)
    }

    /// Start or replace the batching session.
    pub fn start_batching(
        &self,
        params: BatchingParams,
        batching: Option<BatchingCallback>,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.core
            .apply(|state, outbox| state.session.start_batching(params, batching, response, outbox))
    }

    pub fn stop_batching(&self) {
        self.core.apply(|state, outbox| state.session.stop_batching(outbox));
    }

    // -------------------------------------------------------------------------
    // Geofences
    // -------------------------------------------------------------------------

    /// Register `geofences` and bind each value to its new record.
    ///
    /// `collective` receives the per-geofence outcome of this call and of
    /// every later remove, modify, pause or resume of these geofences.
    pub fn add_geofences(
        &self,
        geofences: &mut [Geofence],
        breach: Option<GeofenceBreachCallback>,
        collective: Option<CollectiveResponseCallback>,
    ) -> bool {
        self.core
            .apply(|state, outbox| state.geofences.add(geofences, breach, collective, outbox))
    }

    pub fn remove_geofences(&self, geofences: &[Geofence]) -> bool {
        self.core.apply(|state, outbox| state.geofences.remove(geofences, outbox))
    }

    /// Apply each value's breach types, responsiveness and dwell time to its
    /// record. Geometry cannot change.
    pub fn modify_geofences(&self, geofences: &[Geofence]) -> bool {
        self.core.apply(|state, outbox| state.geofences.modify(geofences, outbox))
    }

    pub fn pause_geofences(&self, geofences: &[Geofence]) -> bool {
        self.core.apply(|state, outbox| state.geofences.pause(geofences, outbox))
    }

    pub fn resume_geofences(&self, geofences: &[Geofence]) -> bool {
        self.core.apply(|state, outbox| state.geofences.resume(geofences, outbox))
    }

    // -------------------------------------------------------------------------
    // Service controls
    // -------------------------------------------------------------------------

    /// Tell the service whether network positioning is available.
    pub fn update_network_availability(&self, available: bool) {
        debug!(client_id = %self.id(), available, "network availability update");
        self.core.apply(|_, outbox| {
            outbox.submit(EngineCommand::UpdateNetworkAvailability(available));
        });
    }

    /// Query the energy GNSS has consumed. A later query replaces
    /// `energy` if the earlier one has not been answered.
    pub fn get_gnss_energy_consumed(
        &self,
        energy: Option<EnergyConsumedCallback>,
        response: Option<ResponseCallback>,
    ) -> bool {
        let Some(energy) = energy else {
            return false;
        };
        self.core.apply(|state, outbox| {
            state.energy = Some(energy);
            let request_id = outbox.submit(EngineCommand::QueryEnergyConsumed);
            if let Some(response) = response {
                state.plain.insert(request_id, response);
            }
        });
        true
    }

    /// Register, replace or (with `None`) remove the system info listener.
    pub fn update_location_system_info_listener(
        &self,
        listener: Option<SystemInfoCallback>,
        response: Option<ResponseCallback>,
    ) -> bool {
        self.core.apply(|state, outbox| {
            state.system_info = listener;
            if let Some(response) = response {
                outbox.deliver(Delivery::response(&response, LocationResponse::Success));
            }
        });
        true
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn session_state(&self, axis: SessionAxis) -> SessionState {
        self.core.inspect(|state| state.session.state(axis))
    }

    /// Rates the engine acknowledged for the current session of `axis`.
    pub fn effective_params(&self, axis: SessionAxis) -> Option<EffectiveParams> {
        self.core.inspect(|state| state.session.effective_params(axis))
    }

    /// True while a start on `axis` has not been answered.
    pub fn is_session_pending(&self, axis: SessionAxis) -> bool {
        self.core.inspect(|state| state.session.is_pending(axis))
    }

    /// State of the registered record `geofence` refers to; `None` if it is
    /// not (or no longer) registered.
    pub fn geofence_state(&self, geofence: &Geofence) -> Option<GeofenceState> {
        self.core.inspect(|state| state.geofences.state(geofence))
    }

    /// Authoritative copy of the record `geofence` refers to.
    pub fn registered_geofence(&self, geofence: &Geofence) -> Option<Geofence> {
        self.core.inspect(|state| state.geofences.registered(geofence))
    }

    pub fn geofence_count(&self) -> usize {
        self.core.inspect(|state| state.geofences.len())
    }
}

impl Drop for LocationClient {
    fn drop(&mut self) {
        let shared = self.core.shared();
        shared.clients.remove(&self.core.id());
        self.core.teardown();
        shared.metrics.client_dropped();
    }
}

impl std::fmt::Debug for LocationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationClient").field("id", &self.id()).finish()
    }
}
