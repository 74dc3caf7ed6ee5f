//! In-process positioning service that fabricates plausible output.
//!
//! [`SimulatedEngine`] answers every request synchronously on the caller's
//! thread by pushing events onto its channel, and can drive a moving device
//! along a straight line to produce periodic tracking reports, batches and
//! geofence transitions. It is a test double and a demo source, not a
//! navigation engine: positions are dead-simple kinematics, NMEA is a stub.
//!
//! # Example
//!
//! ```ignore
//! use location_client::engine::{SimulatedEngine, SimulatedEngineConfig};
//!
//! let (engine, events) = SimulatedEngine::channel(SimulatedEngineConfig::default());
//! let hub = LocationHub::start(HubConfig::default(), engine.clone(), events)?;
//! let loop_handle = engine.spawn_report_loop(shutdown.clone());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::protocol::{
    EngineCommand, EngineEvent, EngineRequest, EngineResponse, GeofenceResult, TrackingReport,
};
use super::PositioningService;
use crate::geofence::{GeofenceRegion, GeofenceTriggers};
use crate::session::{BatchingMode, BatchingParams, EffectiveParams, TrackingParams};
use crate::types::{
    BatchingStatus, CapabilitiesMask, ClientId, Constellation, EngineGeofenceId, EngineKind,
    GeofenceBreachMask, GnssEnergyConsumed, GnssLocation, GnssSv, Location, LocationResponse,
    NmeaSentence, RunningEngines,
};

const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Configuration
// =============================================================================

/// Behaviour of a [`SimulatedEngine`].
#[derive(Debug, Clone)]
pub struct SimulatedEngineConfig {
    /// Engines reported as running at creation.
    pub running: RunningEngines,
    pub capabilities: CapabilitiesMask,
    /// Session intervals are rounded up to a multiple of this.
    pub interval_granularity_ms: u32,
    /// Session intervals below this are raised to it.
    pub min_interval_ms: u32,
    /// Geofences beyond this count are rejected.
    pub geofence_capacity: usize,
    /// Geofences with a larger radius are rejected.
    pub max_geofence_radius_m: f64,
    /// Reject every session start.
    pub reject_sessions: bool,
    /// Starting point of the simulated device.
    pub origin: (f64, f64),
    pub speed_mps: f64,
    /// Degrees clockwise from north.
    pub bearing_deg: f64,
    /// Routine batches are flushed once this many fixes are collected.
    pub batch_flush_size: usize,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            running: RunningEngines::SPE,
            capabilities: CapabilitiesMask::ALL,
            interval_granularity_ms: 100,
            min_interval_ms: 100,
            geofence_capacity: 64,
            max_geofence_radius_m: 100_000.0,
            reject_sessions: false,
            origin: (37.4220, -122.0841),
            speed_mps: 10.0,
            bearing_deg: 90.0,
            batch_flush_size: 5,
        }
    }
}

impl SimulatedEngineConfig {
    pub fn with_running(mut self, running: RunningEngines) -> Self {
        self.running = running;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitiesMask) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_interval_granularity_ms(mut self, granularity_ms: u32) -> Self {
        self.interval_granularity_ms = granularity_ms.max(1);
        self
    }

    pub fn with_min_interval_ms(mut self, min_interval_ms: u32) -> Self {
        self.min_interval_ms = min_interval_ms;
        self
    }

    pub fn with_geofence_capacity(mut self, capacity: usize) -> Self {
        self.geofence_capacity = capacity;
        self
    }

    pub fn with_max_geofence_radius_m(mut self, radius_m: f64) -> Self {
        self.max_geofence_radius_m = radius_m;
        self
    }

    pub fn with_reject_sessions(mut self, reject: bool) -> Self {
        self.reject_sessions = reject;
        self
    }

    pub fn with_motion(mut self, origin: (f64, f64), speed_mps: f64, bearing_deg: f64) -> Self {
        self.origin = origin;
        self.speed_mps = speed_mps;
        self.bearing_deg = bearing_deg;
        self
    }

    pub fn with_batch_flush_size(mut self, size: usize) -> Self {
        self.batch_flush_size = size.max(1);
        self
    }

    /// Rate the engine will use for a requested interval.
    pub fn effective_interval_ms(&self, requested_ms: u32) -> u32 {
        let granularity = self.interval_granularity_ms.max(1);
        let wanted = requested_ms.max(self.min_interval_ms);
        wanted.div_ceil(granularity).saturating_mul(granularity)
    }
}

// =============================================================================
// State
// =============================================================================

struct TrackSession {
    params: TrackingParams,
    effective: EffectiveParams,
    next_due_ms: u64,
    last_reported: Option<Location>,
}

struct BatchSession {
    params: BatchingParams,
    effective: EffectiveParams,
    next_fix_ms: u64,
    fixes: Vec<Location>,
    traveled_m: f64,
    last_fix: Option<Location>,
}

struct SimGeofence {
    owner: ClientId,
    region: GeofenceRegion,
    triggers: GeofenceTriggers,
    paused: bool,
    inside: Option<bool>,
}

struct SimState {
    config: SimulatedEngineConfig,
    running: RunningEngines,
    reject_sessions: bool,
    hold: bool,
    held: Vec<EngineEvent>,
    requests: Vec<EngineRequest>,
    tracking: HashMap<ClientId, TrackSession>,
    batching: HashMap<ClientId, BatchSession>,
    geofences: BTreeMap<EngineGeofenceId, SimGeofence>,
    next_geofence_id: u64,
    network_available: bool,
    /// 0.1 milli-watt-seconds.
    energy: u64,
    position: (f64, f64),
    last_step_ms: Option<u64>,
}

// =============================================================================
// Engine
// =============================================================================

/// Simulated [`PositioningService`].
pub struct SimulatedEngine {
    events: mpsc::UnboundedSender<EngineEvent>,
    state: Mutex<SimState>,
    started: Instant,
}

impl SimulatedEngine {
    /// Create an engine and the event receiver to hand to the hub.
    ///
    /// The first event on the channel announces the configured running
    /// engines.
    pub fn channel(config: SimulatedEngineConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let running = config.running;
        let engine = Arc::new(Self {
            events: tx,
            state: Mutex::new(SimState {
                running,
                reject_sessions: config.reject_sessions,
                hold: false,
                held: Vec::new(),
                requests: Vec::new(),
                tracking: HashMap::new(),
                batching: HashMap::new(),
                geofences: BTreeMap::new(),
                next_geofence_id: 1,
                network_available: true,
                energy: 0,
                position: config.origin,
                last_step_ms: None,
                config,
            }),
            started: Instant::now(),
        });
        engine.send(EngineEvent::EnginesChanged(running));
        (engine, rx)
    }

    fn send(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            trace!("simulated engine: event receiver gone");
        }
    }

    fn publish(&self, state: &mut SimState, events: Vec<EngineEvent>) {
        if state.hold {
            state.held.extend(events);
        } else {
            for event in events {
                self.send(event);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Test and demo controls
    // -------------------------------------------------------------------------

    /// Push an arbitrary event onto the channel.
    pub fn emit(&self, event: EngineEvent) {
        self.send(event);
    }

    /// Change the running engines and announce it.
    pub fn set_running(&self, running: RunningEngines) {
        self.state.lock().running = running;
        info!(running = running.bits(), "simulated engines changed");
        self.send(EngineEvent::EnginesChanged(running));
    }

    pub fn set_reject_sessions(&self, reject: bool) {
        self.state.lock().reject_sessions = reject;
    }

    /// Queue answers instead of sending them until [`release_responses`](Self::release_responses).
    pub fn hold_responses(&self) {
        self.state.lock().hold = true;
    }

    /// Send every held answer in order and stop holding.
    pub fn release_responses(&self) {
        let held = {
            let mut state = self.state.lock();
            state.hold = false;
            std::mem::take(&mut state.held)
        };
        for event in held {
            self.send(event);
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.state.lock().requests.clone()
    }

    /// Commands received from `client_id`, in order.
    pub fn commands_from(&self, client_id: ClientId) -> Vec<EngineCommand> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.client_id == client_id)
            .map(|r| r.command.clone())
            .collect()
    }

    /// Engine geofences currently held.
    pub fn geofence_ids(&self) -> Vec<EngineGeofenceId> {
        self.state.lock().geofences.keys().copied().collect()
    }

    /// Clients with an engine tracking session.
    pub fn tracking_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<_> = self.state.lock().tracking.keys().copied().collect();
        clients.sort();
        clients
    }

    /// Clients with an engine batching session.
    pub fn batching_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<_> = self.state.lock().batching.keys().copied().collect();
        clients.sort();
        clients
    }

    pub fn network_available(&self) -> bool {
        self.state.lock().network_available
    }

    /// Emit one position report built from `location` for the running engines.
    pub fn emit_fix(&self, target: Option<ClientId>, location: Location) {
        let running = self.state.lock().running;
        self.send(EngineEvent::Report {
            target,
            report: Arc::new(TrackingReport::Positions(positions_for(running, &location))),
        });
    }

    /// Emit a breach for `engine_ids`.
    pub fn emit_breach(&self, engine_ids: Vec<EngineGeofenceId>, location: Location, breach: GeofenceBreachMask) {
        let timestamp = location.timestamp;
        self.send(EngineEvent::GeofenceBreach {
            engine_ids,
            location,
            breach,
            timestamp,
        });
    }

    // -------------------------------------------------------------------------
    // Simulation
    // -------------------------------------------------------------------------

    /// Advance the simulated world to `now_ms` (milliseconds since the engine
    /// was created) and emit whatever became due.
    pub fn step(&self, now_ms: u64) {
        let mut state = self.state.lock();
        let mut events = Vec::new();

        let elapsed_ms = state.last_step_ms.map_or(0, |last| now_ms.saturating_sub(last));
        state.last_step_ms = Some(now_ms);
        advance_position(&mut state, elapsed_ms);
        state.energy += elapsed_ms * 10;

        let location = current_location(&state);
        let running = state.running;

        // Tracking.
        for (client_id, session) in state.tracking.iter_mut() {
            if now_ms < session.next_due_ms {
                continue;
            }
            session.next_due_ms = now_ms + u64::from(session.effective.interval_ms);

            if session.params.distance_m > 0 {
                if let Some(last) = &session.last_reported {
                    let moved = last.distance_to(location.latitude, location.longitude);
                    if moved < f64::from(session.params.distance_m) {
                        continue;
                    }
                }
            }
            session.last_reported = Some(location.clone());

            let target = Some(*client_id);
            events.push(EngineEvent::Report {
                target,
                report: Arc::new(TrackingReport::Positions(positions_for(running, &location))),
            });
            events.push(EngineEvent::Report {
                target,
                report: Arc::new(TrackingReport::SvList(sv_list())),
            });
            events.push(EngineEvent::Report {
                target,
                report: Arc::new(TrackingReport::Nmea(NmeaSentence {
                    timestamp: location.timestamp,
                    sentence: format!("$SIMGGA,{:.6},{:.6}", location.latitude, location.longitude),
                })),
            });
        }

        // Batching.
        let flush_size = state.config.batch_flush_size;
        let mut finished = Vec::new();
        for (client_id, session) in state.batching.iter_mut() {
            if now_ms < session.next_fix_ms {
                continue;
            }
            session.next_fix_ms = now_ms + u64::from(session.effective.interval_ms.max(1));

            if let Some(last) = &session.last_fix {
                session.traveled_m += last.distance_to(location.latitude, location.longitude);
            }
            session.last_fix = Some(location.clone());
            session.fixes.push(location.clone());

            match session.params.mode {
                BatchingMode::Trip if session.traveled_m >= f64::from(session.params.distance_m) => {
                    events.push(EngineEvent::Batch {
                        client_id: *client_id,
                        locations: std::mem::take(&mut session.fixes),
                        status: BatchingStatus::Done,
                    });
                    finished.push(*client_id);
                }
                _ if session.fixes.len() >= flush_size => {
                    events.push(EngineEvent::Batch {
                        client_id: *client_id,
                        locations: std::mem::take(&mut session.fixes),
                        status: BatchingStatus::Active,
                    });
                }
                _ => {}
            }
        }
        for client_id in finished {
            state.batching.remove(&client_id);
            debug!(client_id = %client_id, "simulated trip completed");
        }

        // Geofences.
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        for (id, fence) in state.geofences.iter_mut() {
            if fence.paused {
                continue;
            }
            let distance = location.distance_to(fence.region.latitude, fence.region.longitude);
            let inside = distance <= fence.region.radius_m;
            let previous = fence.inside.replace(inside);
            match (previous, inside) {
                (Some(false), true) if fence.triggers.breach_types.intersects(GeofenceBreachMask::ENTER) => {
                    entered.push(*id)
                }
                (Some(true), false) if fence.triggers.breach_types.intersects(GeofenceBreachMask::EXIT) => {
                    exited.push(*id)
                }
                _ => {}
            }
        }
        for (engine_ids, breach) in [(entered, GeofenceBreachMask::ENTER), (exited, GeofenceBreachMask::EXIT)] {
            if !engine_ids.is_empty() {
                events.push(EngineEvent::GeofenceBreach {
                    engine_ids,
                    location: location.clone(),
                    breach,
                    timestamp: location.timestamp,
                });
            }
        }

        for event in events {
            self.send(event);
        }
    }

    /// Drive [`step`](Self::step) on a tokio interval until `shutdown`.
    pub fn spawn_report_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let tick_ms = u64::from(self.state.lock().config.interval_granularity_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
            info!(tick_ms, "simulated engine report loop started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let now_ms = engine.started.elapsed().as_millis() as u64;
                        engine.step(now_ms);
                    }
                }
            }
            info!("simulated engine report loop stopped");
        })
    }

    // -------------------------------------------------------------------------
    // Request handling
    // -------------------------------------------------------------------------

    fn handle(&self, state: &mut SimState, request: &EngineRequest) -> Vec<EngineEvent> {
        let client_id = request.client_id;
        let respond = |response: EngineResponse| EngineEvent::Response {
            client_id,
            request_id: request.request_id,
            response,
        };

        match &request.command {
            EngineCommand::QueryCapabilities => vec![EngineEvent::Capabilities {
                client_id,
                capabilities: state.config.capabilities,
            }],
            EngineCommand::StartTracking(params) => {
                if state.reject_sessions {
                    return vec![respond(session_rejected())];
                }
                let effective = EffectiveParams {
                    interval_ms: state.config.effective_interval_ms(params.interval_ms),
                    distance_m: params.distance_m,
                };
                state.tracking.insert(
                    client_id,
                    TrackSession {
                        params: *params,
                        effective,
                        next_due_ms: 0,
                        last_reported: None,
                    },
                );
                vec![respond(EngineResponse::Session {
                    response: LocationResponse::Success,
                    effective: Some(effective),
                })]
            }
            EngineCommand::StopTracking => {
                state.tracking.remove(&client_id);
                vec![respond(EngineResponse::Plain(LocationResponse::Success))]
            }
            EngineCommand::StartBatching(params) => {
                if state.reject_sessions {
                    return vec![respond(session_rejected())];
                }
                let effective = EffectiveParams {
                    interval_ms: state.config.effective_interval_ms(params.min_interval_ms),
                    distance_m: params.distance_m,
                };
                state.batching.insert(
                    client_id,
                    BatchSession {
                        params: *params,
                        effective,
                        next_fix_ms: 0,
                        fixes: Vec::new(),
                        traveled_m: 0.0,
                        last_fix: None,
                    },
                );
                vec![respond(EngineResponse::Session {
                    response: LocationResponse::Success,
                    effective: Some(effective),
                })]
            }
            EngineCommand::StopBatching => {
                state.batching.remove(&client_id);
                vec![respond(EngineResponse::Plain(LocationResponse::Success))]
            }
            EngineCommand::AddGeofences(specs) => {
                let mut results = Vec::with_capacity(specs.len());
                for spec in specs {
                    let fits = state.geofences.len() < state.config.geofence_capacity;
                    let valid = spec.region.radius_m > 0.0
                        && spec.region.radius_m <= state.config.max_geofence_radius_m;
                    if !(fits && valid) {
                        results.push(GeofenceResult {
                            handle: spec.handle,
                            response: LocationResponse::UnknownFailure,
                            engine_id: None,
                        });
                        continue;
                    }
                    let engine_id = EngineGeofenceId::new(state.next_geofence_id);
                    state.next_geofence_id += 1;
                    state.geofences.insert(
                        engine_id,
                        SimGeofence {
                            owner: client_id,
                            region: spec.region,
                            triggers: spec.triggers,
                            paused: false,
                            inside: None,
                        },
                    );
                    results.push(GeofenceResult {
                        handle: spec.handle,
                        response: LocationResponse::Success,
                        engine_id: Some(engine_id),
                    });
                }
                vec![respond(EngineResponse::Geofences(results))]
            }
            EngineCommand::RemoveGeofences(targets) => {
                let results = targets
                    .iter()
                    .map(|t| {
                        let owned = state
                            .geofences
                            .get(&t.engine_id)
                            .is_some_and(|g| g.owner == client_id);
                        if owned {
                            state.geofences.remove(&t.engine_id);
                        }
                        geofence_result(t.handle, owned)
                    })
                    .collect();
                vec![respond(EngineResponse::Geofences(results))]
            }
            EngineCommand::PauseGeofences(targets) | EngineCommand::ResumeGeofences(targets) => {
                let paused = matches!(request.command, EngineCommand::PauseGeofences(_));
                let results = targets
                    .iter()
                    .map(|t| {
                        let fence = state
                            .geofences
                            .get_mut(&t.engine_id)
                            .filter(|g| g.owner == client_id);
                        let found = fence.is_some();
                        if let Some(fence) = fence {
                            fence.paused = paused;
                            fence.inside = None;
                        }
                        geofence_result(t.handle, found)
                    })
                    .collect();
                vec![respond(EngineResponse::Geofences(results))]
            }
            EngineCommand::ModifyGeofences(updates) => {
                let results = updates
                    .iter()
                    .map(|(t, triggers)| {
                        let fence = state
                            .geofences
                            .get_mut(&t.engine_id)
                            .filter(|g| g.owner == client_id);
                        let found = fence.is_some();
                        if let Some(fence) = fence {
                            fence.triggers = *triggers;
                        }
                        geofence_result(t.handle, found)
                    })
                    .collect();
                vec![respond(EngineResponse::Geofences(results))]
            }
            EngineCommand::EvictGeofences(ids) => {
                for id in ids {
                    state.geofences.remove(id);
                }
                debug!(count = ids.len(), "simulated engine evicted geofences");
                Vec::new()
            }
            EngineCommand::UpdateNetworkAvailability(available) => {
                state.network_available = *available;
                Vec::new()
            }
            EngineCommand::QueryEnergyConsumed => vec![
                respond(EngineResponse::Plain(LocationResponse::Success)),
                EngineEvent::EnergyConsumed {
                    client_id,
                    energy: GnssEnergyConsumed {
                        total_since_first_boot: Some(state.energy),
                    },
                },
            ],
        }
    }
}

impl PositioningService for SimulatedEngine {
    fn submit(&self, request: EngineRequest) {
        let mut state = self.state.lock();
        trace!(client_id = %request.client_id, request_id = %request.request_id, command = request.command.name(), "simulated engine request");
        let events = self.handle(&mut state, &request);
        state.requests.push(request);
        self.publish(&mut state, events);
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

fn session_rejected() -> EngineResponse {
    EngineResponse::Session {
        response: LocationResponse::UnknownFailure,
        effective: None,
    }
}

fn geofence_result(handle: crate::geofence::GeofenceHandle, ok: bool) -> GeofenceResult {
    GeofenceResult {
        handle,
        response: if ok {
            LocationResponse::Success
        } else {
            LocationResponse::UnknownFailure
        },
        engine_id: None,
    }
}

fn advance_position(state: &mut SimState, elapsed_ms: u64) {
    let distance = state.config.speed_mps * elapsed_ms as f64 / 1000.0;
    if distance <= 0.0 {
        return;
    }
    let bearing = state.config.bearing_deg.to_radians();
    let (lat, lon) = state.position;
    let dlat = distance * bearing.cos() / METERS_PER_DEGREE;
    let dlon = distance * bearing.sin() / (METERS_PER_DEGREE * lat.to_radians().cos().max(1e-6));
    state.position = (lat + dlat, lon + dlon);
}

fn current_location(state: &SimState) -> Location {
    let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let (lat, lon) = state.position;
    Location::new(lat, lon, timestamp)
        .with_accuracy(5.0)
        .with_motion(state.config.speed_mps as f32, state.config.bearing_deg as f32)
}

/// One entry per running output engine, plus a fused entry for 2+ engines.
fn positions_for(running: RunningEngines, location: &Location) -> Vec<GnssLocation> {
    let mut positions = Vec::new();
    if running.has_fused_stream() {
        positions.push(GnssLocation::new(location.clone().with_accuracy(2.0), EngineKind::Fused));
    }
    if running.produces(EngineKind::Spe) {
        positions.push(GnssLocation::new(location.clone(), EngineKind::Spe));
    }
    if running.produces(EngineKind::Ppe) {
        positions.push(GnssLocation::new(location.clone().with_accuracy(0.5), EngineKind::Ppe));
    }
    for fix in &mut positions {
        fix.num_sv_used = 8;
        fix.hdop = 0.9;
    }
    positions
}

fn sv_list() -> Vec<GnssSv> {
    [(3, 41.0), (7, 38.5), (12, 44.0), (19, 30.0)]
        .into_iter()
        .map(|(sv_id, cn0)| GnssSv {
            sv_id,
            constellation: Constellation::Gps,
            cn0_dbhz: cn0,
            elevation: 45.0,
            azimuth: f32::from(sv_id) * 15.0,
            used_in_fix: cn0 > 35.0,
        })
        .collect()
}
