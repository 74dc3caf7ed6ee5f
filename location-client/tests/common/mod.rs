//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use location_client::callbacks::{
    BatchingCallback, CollectiveResponseCallback, GeofenceBreachCallback, LocationCallback,
    ResponseCallback, SystemInfoCallback,
};
use location_client::engine::{EngineEvent, SimulatedEngine, SimulatedEngineConfig};
use location_client::types::{BatchingStatus, Location, LocationResponse, LocationSystemInfo};
use location_client::{HubConfig, LocationHub};

pub const WAIT: Duration = Duration::from_secs(2);

/// Hub on a simulated engine.
pub fn hub_with(config: SimulatedEngineConfig) -> (Arc<LocationHub>, Arc<SimulatedEngine>) {
    let (engine, events) = SimulatedEngine::channel(config);
    let hub = LocationHub::start(HubConfig::default(), engine.clone(), events).unwrap();
    (hub, engine)
}

pub fn hub() -> (Arc<LocationHub>, Arc<SimulatedEngine>) {
    hub_with(SimulatedEngineConfig::default())
}

/// Everything a client's callbacks observed, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Response(LocationResponse),
    Location(f64),
    Batch(usize, BatchingStatus),
    Breach(usize),
    Collective(Vec<LocationResponse>),
    SystemInfo,
}

/// A single ordered log fed by every callback it hands out.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Seen>,
    rx: mpsc::UnboundedReceiver<Seen>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn response(&self) -> ResponseCallback {
        let tx = self.tx.clone();
        Arc::new(move |r| {
            let _ = tx.send(Seen::Response(r));
        })
    }

    pub fn location(&self) -> LocationCallback {
        let tx = self.tx.clone();
        Arc::new(move |loc: &Location| {
            let _ = tx.send(Seen::Location(loc.latitude));
        })
    }

    pub fn batching(&self) -> BatchingCallback {
        let tx = self.tx.clone();
        Arc::new(move |locations: &[Location], status| {
            let _ = tx.send(Seen::Batch(locations.len(), status));
        })
    }

    pub fn breach(&self) -> GeofenceBreachCallback {
        let tx = self.tx.clone();
        Arc::new(move |geofences, _location, _breach, _timestamp| {
            let _ = tx.send(Seen::Breach(geofences.len()));
        })
    }

    pub fn collective(&self) -> CollectiveResponseCallback {
        let tx = self.tx.clone();
        Arc::new(move |outcomes| {
            let _ = tx.send(Seen::Collective(outcomes.iter().map(|(_, r)| *r).collect()));
        })
    }

    pub fn system_info(&self) -> SystemInfoCallback {
        let tx = self.tx.clone();
        Arc::new(move |_info| {
            let _ = tx.send(Seen::SystemInfo);
        })
    }

    /// Next observation; panics after [`WAIT`].
    pub async fn next(&mut self) -> Seen {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a callback")
            .expect("recorder channel closed")
    }

    /// Observations up to (not including) the next system info delivery.
    ///
    /// Emitting a system info event after other events is a barrier: the
    /// router handles events in order and the dispatcher delivers in order.
    pub async fn until_barrier(&mut self) -> Vec<Seen> {
        let mut seen = Vec::new();
        loop {
            match self.next().await {
                Seen::SystemInfo => return seen,
                other => seen.push(other),
            }
        }
    }

    /// True if nothing has been observed yet.
    pub fn is_idle(&mut self) -> bool {
        self.rx.try_recv().is_err()
    }
}

pub fn barrier(engine: &SimulatedEngine) {
    engine.emit(EngineEvent::SystemInfo(LocationSystemInfo::default()));
}

pub fn fix(latitude: f64) -> Location {
    Location::new(latitude, 8.0, 1_700_000_000_000)
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
