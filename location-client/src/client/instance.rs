//! Per-client state and its single lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::hub::HubShared;
use crate::callbacks::{CapabilitiesCallback, EnergyConsumedCallback, ResponseCallback, SystemInfoCallback};
use crate::dispatcher::{AxisEpochs, Delivery, DeliveryKind, ResponseDispatcher};
use crate::engine::{EngineResponse, TrackingReport};
use crate::error::LocationError;
use crate::geofence::GeofenceRegistry;
use crate::outbox::Outbox;
use crate::router::ReportAudience;
use crate::session::SessionStateMachine;
use crate::types::{
    BatchingStatus, CapabilitiesMask, ClientId, EngineGeofenceId, GeofenceBreachMask, GnssEnergyConsumed,
    Location, LocationSystemInfo, RequestId, RunningEngines,
};

/// Everything the client lock protects.
pub(crate) struct ClientState {
    pub(crate) session: SessionStateMachine,
    pub(crate) geofences: GeofenceRegistry,
    pub(crate) capabilities: Option<CapabilitiesCallback>,
    pub(crate) energy: Option<EnergyConsumedCallback>,
    /// Response callbacks of requests answered with a plain outcome.
    pub(crate) plain: HashMap<RequestId, ResponseCallback>,
    pub(crate) system_info: Option<SystemInfoCallback>,
    pub(crate) closed: bool,
}

/// How a client took an engine response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseMatch {
    /// A pending request consumed it.
    Matched,
    /// No pending request of this client matches.
    Unmatched,
    /// The client is torn down; nothing was applied.
    Closed,
}

/// A client's state, dispatcher and hub handle.
///
/// Public calls and router events both go through [`ClientCore::apply`], so
/// every state transition, the engine requests it causes and the deliveries
/// it queues happen under one lock, in one order.
pub(crate) struct ClientCore {
    id: ClientId,
    state: Mutex<ClientState>,
    dispatcher: ResponseDispatcher,
    shared: Arc<HubShared>,
}

impl ClientCore {
    pub(crate) fn new(id: ClientId, shared: Arc<HubShared>) -> Result<Self, LocationError> {
        let epochs = Arc::new(AxisEpochs::new());
        let config = &shared.config.client;
        let dispatcher = ResponseDispatcher::spawn(
            id,
            &config.dispatcher_thread_prefix,
            Arc::clone(&epochs),
            Arc::clone(&shared.metrics),
        )?;

        Ok(Self {
            id,
            state: Mutex::new(ClientState {
                session: SessionStateMachine::new(id, epochs, config.max_buffered_reports),
                geofences: GeofenceRegistry::new(id),
                capabilities: None,
                energy: None,
                plain: HashMap::new(),
                system_info: None,
                closed: false,
            }),
            dispatcher,
            shared,
        })
    }

    pub(crate) fn id(&self) -> ClientId {
        self.id
    }

    pub(crate) fn shared(&self) -> &Arc<HubShared> {
        &self.shared
    }

    /// Run `f` under the client lock, then send its engine requests and queue
    /// its deliveries before unlocking.
    pub(crate) fn apply<R>(&self, f: impl FnOnce(&mut ClientState, &mut Outbox<'_>) -> R) -> R {
        let mut state = self.state.lock();
        let mut outbox = Outbox::new(self.id, &self.shared.ids);
        let result = f(&mut state, &mut outbox);
        outbox.flush(self.shared.service.as_ref(), &self.dispatcher);
        result
    }

    /// Read-only access to the state.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Like [`apply`](Self::apply), skipped once the client is torn down.
    fn apply_live<R: Default>(&self, f: impl FnOnce(&mut ClientState, &mut Outbox<'_>) -> R) -> R {
        self.apply(|state, outbox| if state.closed { R::default() } else { f(state, outbox) })
    }

    // -------------------------------------------------------------------------
    // Engine events
    // -------------------------------------------------------------------------

    pub(crate) fn on_response(&self, request_id: RequestId, response: &EngineResponse) -> ResponseMatch {
        self.apply(|state, outbox| {
            if state.closed {
                return ResponseMatch::Closed;
            }
            if let EngineResponse::Geofences(results) = response {
                if state.geofences.on_response(request_id, results, outbox) {
                    return ResponseMatch::Matched;
                }
            }
            if state.session.on_response(request_id, response, outbox) {
                return ResponseMatch::Matched;
            }
            if let Some(callback) = state.plain.remove(&request_id) {
                outbox.deliver(Delivery::response(&callback, response.outcome()));
                return ResponseMatch::Matched;
            }
            trace!(client_id = %self.id, request_id = %request_id, "response with no pending request");
            ResponseMatch::Unmatched
        })
    }

    pub(crate) fn on_capabilities(&self, capabilities: CapabilitiesMask) {
        self.apply_live(|state, outbox| {
            if let Some(callback) = state.capabilities.take() {
                debug!(client_id = %self.id, capabilities = capabilities.bits(), "capabilities received");
                outbox.deliver(Delivery::new(DeliveryKind::Capabilities, move || callback(capabilities)));
            }
        })
    }

    pub(crate) fn on_report(
        &self,
        report: &Arc<TrackingReport>,
        running: RunningEngines,
        audience: ReportAudience,
    ) -> usize {
        self.apply_live(|state, outbox| state.session.route_tracking(report, running, audience, outbox))
    }

    pub(crate) fn on_batch(&self, locations: Vec<Location>, status: BatchingStatus) -> bool {
        self.apply_live(|state, outbox| state.session.route_batch(locations, status, outbox))
    }

    /// Deliver a breach; returns the engine ids this client owns.
    pub(crate) fn on_breach(
        &self,
        engine_ids: &[EngineGeofenceId],
        location: &Location,
        breach: GeofenceBreachMask,
        timestamp: u64,
    ) -> Vec<EngineGeofenceId> {
        self.apply_live(|state, outbox| {
            state
                .geofences
                .on_breach(engine_ids, location, breach, timestamp, outbox)
        })
    }

    pub(crate) fn on_energy_consumed(&self, energy: GnssEnergyConsumed) {
        self.apply_live(|state, outbox| {
            if let Some(callback) = state.energy.take() {
                outbox.deliver(Delivery::new(DeliveryKind::EnergyConsumed, move || callback(&energy)));
            }
        })
    }

    pub(crate) fn on_system_info(&self, info: &LocationSystemInfo) {
        self.apply_live(|state, outbox| {
            if let Some(callback) = state.system_info.clone() {
                let info = info.clone();
                outbox.deliver(Delivery::new(DeliveryKind::SystemInfo, move || callback(&info)));
            }
        })
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Stop both sessions, release every geofence and stop the dispatcher
    /// after it drains. Idempotent.
    pub(crate) fn teardown(&self) {
        let released = self.apply(|state, outbox| {
            if state.closed {
                return None;
            }
            state.closed = true;
            state.session.teardown(outbox);
            let released = state.geofences.teardown(outbox);
            state.capabilities = None;
            state.energy = None;
            state.system_info = None;
            state.plain.clear();
            Some(released)
        });

        if let Some(released) = released {
            self.dispatcher.close();
            info!(client_id = %self.id, geofences_released = released, "client destroyed");
        }
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.teardown();
    }
}
