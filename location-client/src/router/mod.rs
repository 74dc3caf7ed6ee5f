//! Engine event demultiplexing.
//!
//! The [`EngineReportRouter`] is a long-running task that consumes the
//! positioning service's event stream and hands each event to the clients it
//! concerns:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        EngineReportRouter                        │
//! │                                                                  │
//! │ EngineEvent ──► EnginesChanged ──► running set                   │
//! │             ──► Response/Caps/Energy/Batch ──► owning client     │
//! │             ──► Report(target) ──► owner + passive listeners     │
//! │             ──► Report(None)   ──► every tracking client         │
//! │             ──► GeofenceBreach ──► claiming clients              │
//! │                                    └─ unclaimed ──► evict        │
//! │             ──► SystemInfo     ──► registered listeners          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Routing never blocks: a client handler only updates state and queues on
//! the client's dispatcher. Events are handled one at a time in arrival
//! order, so each client sees reports in the engine's order.
//!
//! # Orphaned geofences
//!
//! A geofence whose owner is gone is released twice over. Dropping a client
//! removes its registered geofences eagerly. Anything still reaching the
//! router afterwards (a breach nobody claims, or a successful add answered
//! after the owner vanished) is evicted with an `EvictGeofences` request
//! when [`RouterConfig::evict_orphaned_geofences`](crate::config::RouterConfig)
//! is set.

pub mod delivery;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use delivery::ReportAudience;

use crate::client::{HubShared, ResponseMatch};
use crate::engine::{EngineCommand, EngineEvent, EngineRequest, EngineResponse, TrackingReport};
use crate::types::{ClientId, EngineGeofenceId, GeofenceBreachMask, Location, RunningEngines};

/// Router task state.
pub struct EngineReportRouter {
    shared: Arc<HubShared>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    running: RunningEngines,
}

impl EngineReportRouter {
    pub(crate) fn new(shared: Arc<HubShared>, events: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        Self {
            shared,
            events,
            running: RunningEngines::SPE,
        }
    }

    /// Route events until `shutdown` fires or the service drops its sender.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("engine report router started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("engine report router shutting down");
                    break;
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.route(event),
                        None => {
                            info!("engine event channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("engine report router stopped");
    }

    fn route(&mut self, event: EngineEvent) {
        self.shared.metrics.event_received();

        match event {
            EngineEvent::EnginesChanged(running) => {
                info!(running = running.bits(), "running engines changed");
                self.running = running;
            }
            EngineEvent::Response {
                client_id,
                request_id,
                response,
            } => match self.shared.client(client_id).map(|client| client.on_response(request_id, &response)) {
                Some(ResponseMatch::Matched) => {}
                Some(ResponseMatch::Unmatched) => {
                    debug!(client_id = %client_id, request_id = %request_id, "unmatched response");
                }
                // Torn down after the directory lookup.
                Some(ResponseMatch::Closed) | None => self.on_orphan_response(client_id, &response),
            },
            EngineEvent::Capabilities {
                client_id,
                capabilities,
            } => {
                if let Some(client) = self.shared.client(client_id) {
                    client.on_capabilities(capabilities);
                }
            }
            EngineEvent::Report { target, report } => self.route_report(target, &report),
            EngineEvent::Batch {
                client_id,
                locations,
                status,
            } => {
                let delivered = self
                    .shared
                    .client(client_id)
                    .is_some_and(|client| client.on_batch(locations, status));
                if !delivered {
                    debug!(client_id = %client_id, "batch for client without batching session");
                }
            }
            EngineEvent::GeofenceBreach {
                engine_ids,
                location,
                breach,
                timestamp,
            } => self.route_breach(&engine_ids, &location, breach, timestamp),
            EngineEvent::EnergyConsumed { client_id, energy } => {
                if let Some(client) = self.shared.client(client_id) {
                    client.on_energy_consumed(energy);
                }
            }
            EngineEvent::SystemInfo(info) => {
                for client in self.shared.live_clients() {
                    client.on_system_info(&info);
                }
            }
        }
    }

    fn route_report(&self, target: Option<ClientId>, report: &Arc<TrackingReport>) {
        let mut routed = 0;
        for client in self.shared.live_clients() {
            let audience = match target {
                Some(owner) if owner != client.id() => ReportAudience::Listener,
                _ => ReportAudience::Owner,
            };
            routed += client.on_report(report, self.running, audience);
        }
        self.shared.metrics.reports_routed(routed);
    }

    fn route_breach(
        &self,
        engine_ids: &[EngineGeofenceId],
        location: &Location,
        breach: GeofenceBreachMask,
        timestamp: u64,
    ) {
        let mut unclaimed: Vec<EngineGeofenceId> = engine_ids.to_vec();
        for client in self.shared.live_clients() {
            let claimed = client.on_breach(engine_ids, location, breach, timestamp);
            unclaimed.retain(|id| !claimed.contains(id));
        }

        if !unclaimed.is_empty() {
            debug!(count = unclaimed.len(), "breach for unclaimed geofences");
            self.evict(unclaimed);
        }
    }

    /// A response for a client that no longer exists. Only successful adds
    /// leave anything behind on the engine.
    fn on_orphan_response(&self, client_id: ClientId, response: &EngineResponse) {
        let EngineResponse::Geofences(results) = response else {
            debug!(client_id = %client_id, "response for departed client dropped");
            return;
        };
        let leaked: Vec<_> = results
            .iter()
            .filter(|r| r.response.is_success())
            .filter_map(|r| r.engine_id)
            .collect();
        if !leaked.is_empty() {
            debug!(client_id = %client_id, count = leaked.len(), "geofences added for departed client");
            self.evict(leaked);
        }
    }

    fn evict(&self, engine_ids: Vec<EngineGeofenceId>) {
        if !self.shared.config.router.evict_orphaned_geofences {
            return;
        }
        let count = engine_ids.len();
        warn!(count, "evicting orphaned geofences");
        self.shared.service.submit(EngineRequest {
            client_id: ClientId::HUB,
            request_id: self.shared.ids.next_request(),
            command: EngineCommand::EvictGeofences(engine_ids),
        });
        self.shared.metrics.orphans_evicted(count);
    }
}
