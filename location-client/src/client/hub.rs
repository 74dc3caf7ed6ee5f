//! Hub: the injected positioning service plus the router that serves it.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::instance::ClientCore;
use crate::config::HubConfig;
use crate::engine::{EngineEvent, PositioningService};
use crate::error::LocationError;
use crate::router::EngineReportRouter;
use crate::telemetry::{HubMetrics, TelemetrySnapshot};
use crate::types::{ClientId, IdSequence};

/// State shared by the hub, its router and every client.
pub(crate) struct HubShared {
    pub(crate) service: Arc<dyn PositioningService>,
    pub(crate) clients: DashMap<ClientId, Weak<ClientCore>>,
    pub(crate) metrics: Arc<HubMetrics>,
    pub(crate) ids: IdSequence,
    pub(crate) config: HubConfig,
    pub(crate) shutdown: CancellationToken,
}

impl HubShared {
    /// Live clients, collected so no directory shard lock is held while
    /// their state is locked.
    pub(crate) fn live_clients(&self) -> Vec<Arc<ClientCore>> {
        self.clients.iter().filter_map(|entry| entry.value().upgrade()).collect()
    }

    pub(crate) fn client(&self, client_id: ClientId) -> Option<Arc<ClientCore>> {
        self.clients.get(&client_id).and_then(|entry| entry.value().upgrade())
    }
}

/// Owner of a positioning service and the router task that feeds its events
/// to clients.
///
/// The service outlives every client built on the hub. Dropping the last
/// handle, or calling [`shutdown`](Self::shutdown), stops the router; clients
/// still alive afterwards receive no further engine events.
pub struct LocationHub {
    shared: Arc<HubShared>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl LocationHub {
    /// Start a hub on the current tokio runtime.
    ///
    /// `events` is the receiving end of the channel `service` answers on.
    pub fn start(
        config: HubConfig,
        service: Arc<dyn PositioningService>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<Arc<Self>, LocationError> {
        let runtime = Handle::try_current().map_err(|e| LocationError::NoRuntime(e.to_string()))?;

        let shared = Arc::new(HubShared {
            service,
            clients: DashMap::new(),
            metrics: Arc::new(HubMetrics::new()),
            ids: IdSequence::new(),
            config,
            shutdown: CancellationToken::new(),
        });

        let router = EngineReportRouter::new(Arc::clone(&shared), events);
        let task = runtime.spawn(router.run(shared.shutdown.clone()));

        info!(service = shared.service.name(), "location hub started");
        Ok(Arc::new(Self {
            shared,
            router: Mutex::new(Some(task)),
        }))
    }

    pub(crate) fn shared(&self) -> &Arc<HubShared> {
        &self.shared
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Point-in-time copy of the hub counters.
    pub fn metrics(&self) -> TelemetrySnapshot {
        self.shared.metrics.snapshot()
    }

    /// Number of clients currently alive.
    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop the router. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        info!("location hub shutting down");
    }

    /// Stop the router and wait for it to exit.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let task = self.router.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for LocationHub {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for LocationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationHub")
            .field("service", &self.shared.service.name())
            .field("clients", &self.shared.clients.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
