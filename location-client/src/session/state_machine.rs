//! Per-client session state machine.
//!
//! Two independent axes, tracking and batching, each hold at most one live
//! session. Both axes share one generic slot implementation:
//!
//! ```text
//!             start (engine)                response ok
//!   Idle ──────────────────────► Pending ─────────────────► Active
//!    ▲  ▲                           │ response failed          │
//!    │  │                           └──► rollback to last      │
//!    │  │                                acknowledged session  │
//!    │  └───────────────────── stop ───────────────────────────┘
//!    └─ start (passive) ───► Active (no engine session)
//! ```
//!
//! Every start is non-contextual: the new session replaces whatever the axis
//! held, and its outcome depends only on its own parameters. Rollback on a
//! failed start applies only if that start is still the latest request on the
//! axis; a failure for a request that has since been superseded leaves the
//! state alone.
//!
//! While a start is pending, reports for the axis are buffered and released
//! right after the start's response, so the response callback always runs
//! before the first report of the session it started.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::params::{BatchingMode, BatchingParams, EffectiveParams, SessionAxis, SessionState, TrackingParams};
use crate::callbacks::{BatchingCallback, ReportCallbackSet, ResponseCallback};
use crate::dispatcher::{AxisEpochs, Delivery, DeliveryKind, Job};
use crate::engine::{EngineCommand, EngineResponse, TrackingReport};
use crate::outbox::Outbox;
use crate::router::delivery::{self, ReportAudience};
use crate::types::{BatchingStatus, ClientId, Location, LocationResponse, RequestId, RunningEngines};

// =============================================================================
// Sessions
// =============================================================================

trait AxisSession: Clone {
    type Params: Copy + PartialEq + std::fmt::Debug;

    fn params(&self) -> Self::Params;

    /// False for sessions that only listen to other clients' sessions.
    fn needs_engine(&self) -> bool;
}

#[derive(Clone)]
struct TrackingSession {
    params: TrackingParams,
    callbacks: ReportCallbackSet,
}

impl AxisSession for TrackingSession {
    type Params = TrackingParams;

    fn params(&self) -> TrackingParams {
        self.params
    }

    fn needs_engine(&self) -> bool {
        !self.params.is_passive()
    }
}

#[derive(Clone)]
struct BatchingSession {
    params: BatchingParams,
    callback: BatchingCallback,
}

impl AxisSession for BatchingSession {
    type Params = BatchingParams;

    fn params(&self) -> BatchingParams {
        self.params
    }

    fn needs_engine(&self) -> bool {
        true
    }
}

// =============================================================================
// Axis slot
// =============================================================================

struct PendingStart<S> {
    /// Session this request configures; cleared once a stop or passive start
    /// supersedes it.
    candidate: Option<S>,
    waiters: Vec<ResponseCallback>,
}

struct AxisSlot<S> {
    axis: SessionAxis,
    /// Session as the client last requested it.
    session: Option<S>,
    /// Last session the engine acknowledged; the rollback target.
    confirmed: Option<S>,
    acknowledged: Option<EffectiveParams>,
    /// An engine session for this client exists or has been requested.
    engine_active: bool,
    /// Most recent start still waiting for its response.
    latest_request: Option<RequestId>,
    pending: HashMap<RequestId, PendingStart<S>>,
    buffered: VecDeque<Delivery>,
}

fn stop_command(axis: SessionAxis) -> EngineCommand {
    match axis {
        SessionAxis::Tracking => EngineCommand::StopTracking,
        SessionAxis::Batching => EngineCommand::StopBatching,
    }
}

impl<S: AxisSession> AxisSlot<S> {
    fn new(axis: SessionAxis) -> Self {
        Self {
            axis,
            session: None,
            confirmed: None,
            acknowledged: None,
            engine_active: false,
            latest_request: None,
            pending: HashMap::new(),
            buffered: VecDeque::new(),
        }
    }

    fn begin_epoch(&mut self, epochs: &AxisEpochs) {
        epochs.advance(self.axis);
        self.buffered.clear();
    }

    fn supersede_pending(&mut self) {
        self.latest_request = None;
        for pending in self.pending.values_mut() {
            pending.candidate = None;
        }
    }

    fn start(
        &mut self,
        session: S,
        response: Option<ResponseCallback>,
        epochs: &AxisEpochs,
        outbox: &mut Outbox<'_>,
        start_command: impl FnOnce(S::Params) -> EngineCommand,
    ) {
        let client_id = outbox.client_id();
        let axis = self.axis;
        let params = session.params();

        // Same params as the start still in flight: share its response.
        let joinable = self.latest_request.filter(|id| {
            self.pending
                .get(id)
                .and_then(|p| p.candidate.as_ref())
                .map(S::params)
                == Some(params)
        });
        if let Some(request_id) = joinable {
            self.begin_epoch(epochs);
            if let Some(pending) = self.pending.get_mut(&request_id) {
                pending.candidate = Some(session.clone());
                pending.waiters.extend(response);
            }
            self.session = Some(session);
            debug!(client_id = %client_id, axis = %axis, request_id = %request_id, "joined in-flight start");
            return;
        }

        // Same params as the session the engine already runs.
        let acknowledged = self.latest_request.is_none()
            && self.engine_active
            && self.confirmed.as_ref().map(S::params) == Some(params);
        if acknowledged {
            self.begin_epoch(epochs);
            self.confirmed = Some(session.clone());
            self.session = Some(session);
            if let Some(cb) = &response {
                outbox.deliver(Delivery::response(cb, LocationResponse::Success));
            }
            debug!(client_id = %client_id, axis = %axis, "identical to running session, engine request skipped");
            return;
        }

        self.begin_epoch(epochs);

        if !session.needs_engine() {
            if self.engine_active {
                outbox.submit(stop_command(axis));
                self.engine_active = false;
            }
            self.supersede_pending();
            self.acknowledged = None;
            self.confirmed = Some(session.clone());
            self.session = Some(session);
            if let Some(cb) = &response {
                outbox.deliver(Delivery::response(cb, LocationResponse::Success));
            }
            info!(client_id = %client_id, axis = %axis, "passive session started");
            return;
        }

        let request_id = outbox.submit(start_command(params));
        self.pending.insert(
            request_id,
            PendingStart {
                candidate: Some(session.clone()),
                waiters: response.into_iter().collect(),
            },
        );
        self.latest_request = Some(request_id);
        self.session = Some(session);
        self.engine_active = true;
        info!(client_id = %client_id, axis = %axis, request_id = %request_id, params = ?params, "session start requested");
    }

    /// Returns false if `request_id` is not a start on this axis.
    fn on_response(
        &mut self,
        request_id: RequestId,
        response: LocationResponse,
        effective: Option<EffectiveParams>,
        epochs: &AxisEpochs,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let Some(pending) = self.pending.remove(&request_id) else {
            return false;
        };
        let client_id = outbox.client_id();
        let axis = self.axis;
        let is_latest = self.latest_request == Some(request_id);

        for cb in &pending.waiters {
            outbox.deliver(Delivery::response(cb, response));
        }

        if response.is_success() {
            if is_latest {
                self.latest_request = None;
                self.confirmed = self.session.clone();
                self.acknowledged = effective;
                outbox.deliver_all(self.buffered.drain(..));
                info!(client_id = %client_id, axis = %axis, request_id = %request_id, effective = ?effective, "session started");
            } else if let Some(candidate) = pending.candidate {
                self.confirmed = Some(candidate);
                self.acknowledged = effective;
                debug!(client_id = %client_id, axis = %axis, request_id = %request_id, "superseded start acknowledged");
            }
        } else if is_latest {
            self.latest_request = None;
            self.begin_epoch(epochs);
            self.session = self.confirmed.clone();
            self.engine_active = self.confirmed.as_ref().is_some_and(S::needs_engine);
            warn!(client_id = %client_id, axis = %axis, request_id = %request_id, response = %response, "session start rejected, rolled back");
        } else {
            debug!(client_id = %client_id, axis = %axis, request_id = %request_id, response = %response, "superseded start rejected");
        }

        true
    }

    /// Queue or buffer report jobs under the current epoch.
    fn route(
        &mut self,
        kind: DeliveryKind,
        jobs: Vec<Job>,
        epochs: &AxisEpochs,
        max_buffered: usize,
        outbox: &mut Outbox<'_>,
    ) -> usize {
        let epoch = epochs.current(self.axis);
        let count = jobs.len();

        for job in jobs {
            let delivery = Delivery::gated(kind, self.axis, epoch, job);
            if self.latest_request.is_none() {
                outbox.deliver(delivery);
                continue;
            }
            if max_buffered == 0 {
                continue;
            }
            if self.buffered.len() >= max_buffered {
                self.buffered.pop_front();
                debug!(client_id = %outbox.client_id(), axis = %self.axis, "report buffer full, oldest dropped");
            }
            self.buffered.push_back(delivery);
        }

        count
    }

    /// End the session without telling the engine.
    fn finish(&mut self, epochs: &AxisEpochs) {
        self.begin_epoch(epochs);
        self.supersede_pending();
        self.engine_active = false;
        self.session = None;
        self.confirmed = None;
        self.acknowledged = None;
    }

    fn stop(&mut self, epochs: &AxisEpochs, outbox: &mut Outbox<'_>) -> bool {
        if self.session.is_none() {
            return false;
        }
        let engine_active = self.engine_active;
        self.finish(epochs);
        if engine_active {
            outbox.submit(stop_command(self.axis));
        }
        info!(client_id = %outbox.client_id(), axis = %self.axis, "session stopped");
        true
    }
}

// =============================================================================
// State machine
// =============================================================================

/// Tracking and batching sessions of one client.
pub struct SessionStateMachine {
    client_id: ClientId,
    epochs: Arc<AxisEpochs>,
    max_buffered_reports: usize,
    tracking: AxisSlot<TrackingSession>,
    batching: AxisSlot<BatchingSession>,
}

impl SessionStateMachine {
    pub(crate) fn new(client_id: ClientId, epochs: Arc<AxisEpochs>, max_buffered_reports: usize) -> Self {
        Self {
            client_id,
            epochs,
            max_buffered_reports,
            tracking: AxisSlot::new(SessionAxis::Tracking),
            batching: AxisSlot::new(SessionAxis::Batching),
        }
    }

    /// Start or replace the tracking session.
    ///
    /// Returns false, touching nothing, if `callbacks` is empty.
    pub(crate) fn start_tracking(
        &mut self,
        params: TrackingParams,
        callbacks: ReportCallbackSet,
        response: Option<ResponseCallback>,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        if callbacks.is_empty() {
            debug!(client_id = %self.client_id, "start tracking ignored: no report callback");
            return false;
        }
        let session = TrackingSession { params, callbacks };
        self.tracking
            .start(session, response, &self.epochs, outbox, EngineCommand::StartTracking);
        true
    }

    pub(crate) fn stop_tracking(&mut self, outbox: &mut Outbox<'_>) -> bool {
        self.tracking.stop(&self.epochs, outbox)
    }

    /// Start or replace the batching session.
    ///
    /// Returns false, touching nothing, without a callback or when neither
    /// rate is set.
    pub(crate) fn start_batching(
        &mut self,
        params: BatchingParams,
        callback: Option<BatchingCallback>,
        response: Option<ResponseCallback>,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let Some(callback) = callback else {
            debug!(client_id = %self.client_id, "start batching ignored: no batching callback");
            return false;
        };
        if params.is_dont_care() {
            debug!(client_id = %self.client_id, "start batching ignored: no rate given");
            return false;
        }
        let session = BatchingSession { params, callback };
        self.batching
            .start(session, response, &self.epochs, outbox, EngineCommand::StartBatching);
        true
    }

    pub(crate) fn stop_batching(&mut self, outbox: &mut Outbox<'_>) -> bool {
        self.batching.stop(&self.epochs, outbox)
    }

    /// Apply an engine response; false if it answers no session start.
    pub(crate) fn on_response(
        &mut self,
        request_id: RequestId,
        response: &EngineResponse,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let (outcome, effective) = match response {
            EngineResponse::Session { response, effective } => (*response, *effective),
            other => (other.outcome(), None),
        };
        self.tracking
            .on_response(request_id, outcome, effective, &self.epochs, outbox)
            || self
                .batching
                .on_response(request_id, outcome, effective, &self.epochs, outbox)
    }

    /// Route a tracking report to this client's callbacks.
    ///
    /// Returns the number of callback invocations queued or buffered.
    pub(crate) fn route_tracking(
        &mut self,
        report: &Arc<TrackingReport>,
        running: RunningEngines,
        audience: ReportAudience,
        outbox: &mut Outbox<'_>,
    ) -> usize {
        let Some(session) = &self.tracking.session else {
            return 0;
        };
        if audience == ReportAudience::Listener && !session.params.is_passive() {
            return 0;
        }

        let jobs = delivery::report_jobs(report, session.params.engines, running, &session.callbacks);
        self.tracking.route(
            DeliveryKind::Report,
            jobs,
            &self.epochs,
            self.max_buffered_reports,
            outbox,
        )
    }

    /// Route a batch to the batching callback; false without a session.
    ///
    /// A `Done` batch of a trip session is delivered and ends the session.
    pub(crate) fn route_batch(
        &mut self,
        locations: Vec<Location>,
        status: BatchingStatus,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let Some(session) = &self.batching.session else {
            return false;
        };
        let callback = Arc::clone(&session.callback);
        let trip_done = status == BatchingStatus::Done
            && session.params.mode == BatchingMode::Trip
            && self.batching.latest_request.is_none();

        if trip_done {
            outbox.deliver(Delivery::new(DeliveryKind::Batch, move || {
                callback(locations.as_slice(), status)
            }));
            self.batching.finish(&self.epochs);
            info!(client_id = %self.client_id, "trip batching completed");
        } else {
            let job: Job = Box::new(move || callback(locations.as_slice(), status));
            self.batching.route(
                DeliveryKind::Batch,
                vec![job],
                &self.epochs,
                self.max_buffered_reports,
                outbox,
            );
        }
        true
    }

    /// Stop both axes.
    pub(crate) fn teardown(&mut self, outbox: &mut Outbox<'_>) {
        self.tracking.stop(&self.epochs, outbox);
        self.batching.stop(&self.epochs, outbox);
    }

    /// Current state of `axis`.
    pub fn state(&self, axis: SessionAxis) -> SessionState {
        match axis {
            SessionAxis::Tracking => self
                .tracking
                .session
                .as_ref()
                .map_or(SessionState::Idle, |s| SessionState::Tracking(s.params)),
            SessionAxis::Batching => self
                .batching
                .session
                .as_ref()
                .map_or(SessionState::Idle, |s| SessionState::Batching(s.params)),
        }
    }

    /// Rates the engine acknowledged for the running session of `axis`.
    pub fn effective_params(&self, axis: SessionAxis) -> Option<EffectiveParams> {
        match axis {
            SessionAxis::Tracking => self.tracking.acknowledged,
            SessionAxis::Batching => self.batching.acknowledged,
        }
    }

    /// True while a start on `axis` awaits its response.
    pub fn is_pending(&self, axis: SessionAxis) -> bool {
        match axis {
            SessionAxis::Tracking => self.tracking.latest_request.is_some(),
            SessionAxis::Batching => self.batching.latest_request.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineRequest;
    use crate::types::{EngineKind, GnssLocation, IdSequence};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    struct Harness {
        ids: IdSequence,
        epochs: Arc<AxisEpochs>,
        machine: SessionStateMachine,
    }

    impl Harness {
        fn new() -> Self {
            let epochs = Arc::new(AxisEpochs::new());
            Self {
                ids: IdSequence::new(),
                machine: SessionStateMachine::new(ClientId::new(1), Arc::clone(&epochs), 4),
                epochs,
            }
        }

        fn step<R>(
            &mut self,
            f: impl FnOnce(&mut SessionStateMachine, &mut Outbox<'_>) -> R,
        ) -> (R, Vec<EngineRequest>, Vec<Delivery>) {
            let mut outbox = Outbox::new(ClientId::new(1), &self.ids);
            let result = f(&mut self.machine, &mut outbox);
            let (requests, deliveries) = outbox.into_parts();
            (result, requests, deliveries)
        }

        fn respond(&mut self, request_id: RequestId, response: LocationResponse) -> Vec<Delivery> {
            let effective = response.is_success().then_some(EffectiveParams {
                interval_ms: 1000,
                distance_m: 0,
            });
            let answer = EngineResponse::Session { response, effective };
            let (handled, _, deliveries) = self.step(|m, o| m.on_response(request_id, &answer, o));
            assert!(handled);
            deliveries
        }
    }

    fn location_callbacks() -> ReportCallbackSet {
        ReportCallbackSet::new().with_location(Arc::new(|_| {}))
    }

    fn recording_response(log: &Arc<Mutex<Vec<LocationResponse>>>) -> ResponseCallback {
        let log = Arc::clone(log);
        Arc::new(move |r| log.lock().push(r))
    }

    fn positions() -> Arc<TrackingReport> {
        Arc::new(TrackingReport::Positions(vec![GnssLocation::new(
            Location::new(1.0, 2.0, 3),
            EngineKind::Spe,
        )]))
    }

    fn kinds(deliveries: &[Delivery]) -> Vec<DeliveryKind> {
        deliveries.iter().map(Delivery::kind).collect()
    }

    #[test]
    fn test_start_tracking_without_callbacks_is_noop() {
        let mut h = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recording_response(&log);

        let (accepted, requests, deliveries) = h.step(|m, o| {
            m.start_tracking(TrackingParams::new(1000), ReportCallbackSet::new(), Some(cb), o)
        });

        assert!(!accepted);
        assert!(requests.is_empty());
        assert!(deliveries.is_empty());
        assert!(h.machine.state(SessionAxis::Tracking).is_idle());
        assert_eq!(h.epochs.current(SessionAxis::Tracking), 0);
    }

    #[test]
    fn test_start_tracking_issues_request() {
        let mut h = Harness::new();
        let params = TrackingParams::new(1000);

        let (accepted, requests, deliveries) =
            h.step(|m, o| m.start_tracking(params, location_callbacks(), None, o));

        assert!(accepted);
        assert!(deliveries.is_empty());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].command, EngineCommand::StartTracking(params));
        assert_eq!(h.machine.state(SessionAxis::Tracking), SessionState::Tracking(params));
        assert!(h.machine.is_pending(SessionAxis::Tracking));
    }

    #[test]
    fn test_response_precedes_buffered_reports() {
        let mut h = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recording_response(&log);

        let (_, requests, _) =
            h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), Some(cb), o));

        let (routed, _, deliveries) = h.step(|m, o| {
            m.route_tracking(&positions(), RunningEngines::SPE, ReportAudience::Owner, o)
        });
        assert_eq!(routed, 1);
        assert!(deliveries.is_empty(), "reports must wait for the start response");

        let deliveries = h.respond(requests[0].request_id, LocationResponse::Success);
        assert_eq!(kinds(&deliveries), vec![DeliveryKind::Response, DeliveryKind::Report]);
        assert!(!h.machine.is_pending(SessionAxis::Tracking));
        assert_eq!(
            h.machine.effective_params(SessionAxis::Tracking).map(|e| e.interval_ms),
            Some(1000)
        );

        for d in deliveries {
            d.run();
        }
        assert_eq!(*log.lock(), vec![LocationResponse::Success]);
    }

    #[test]
    fn test_report_buffer_is_bounded() {
        let mut h = Harness::new();
        let (_, requests, _) =
            h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), None, o));

        for _ in 0..10 {
            h.step(|m, o| m.route_tracking(&positions(), RunningEngines::SPE, ReportAudience::Owner, o));
        }

        let deliveries = h.respond(requests[0].request_id, LocationResponse::Success);
        assert_eq!(deliveries.len(), 4);
    }

    #[test]
    fn test_failed_start_rolls_back_to_acknowledged_session() {
        let mut h = Harness::new();
        let first = TrackingParams::new(1000);
        let second = TrackingParams::new(5000);

        let (_, requests, _) = h.step(|m, o| m.start_tracking(first, location_callbacks(), None, o));
        h.respond(requests[0].request_id, LocationResponse::Success);

        let (_, requests, _) = h.step(|m, o| m.start_tracking(second, location_callbacks(), None, o));
        h.step(|m, o| m.route_tracking(&positions(), RunningEngines::SPE, ReportAudience::Owner, o));

        let deliveries = h.respond(requests[0].request_id, LocationResponse::UnknownFailure);
        assert!(deliveries.is_empty(), "no response callback and buffered reports dropped");
        assert_eq!(h.machine.state(SessionAxis::Tracking), SessionState::Tracking(first));
    }

    #[test]
    fn test_failed_first_start_returns_to_idle() {
        let mut h = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recording_response(&log);

        let (_, requests, _) =
            h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), Some(cb), o));
        let deliveries = h.respond(requests[0].request_id, LocationResponse::NotSupported);
        for d in deliveries {
            d.run();
        }

        assert!(h.machine.state(SessionAxis::Tracking).is_idle());
        assert_eq!(*log.lock(), vec![LocationResponse::NotSupported]);

        // Nothing runs on the engine, so stopping is a plain no-op.
        let (stopped, requests, _) = h.step(|m, o| m.stop_tracking(o));
        assert!(!stopped);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_superseded_failure_does_not_roll_back() {
        let mut h = Harness::new();
        let first = TrackingParams::new(1000);
        let second = TrackingParams::new(2000);

        let (_, r1, _) = h.step(|m, o| m.start_tracking(first, location_callbacks(), None, o));
        let (_, r2, _) = h.step(|m, o| m.start_tracking(second, location_callbacks(), None, o));

        h.respond(r1[0].request_id, LocationResponse::UnknownFailure);
        assert_eq!(h.machine.state(SessionAxis::Tracking), SessionState::Tracking(second));
        assert!(h.machine.is_pending(SessionAxis::Tracking));

        h.respond(r2[0].request_id, LocationResponse::Success);
        assert_eq!(h.machine.state(SessionAxis::Tracking), SessionState::Tracking(second));
    }

    #[test]
    fn test_superseded_success_becomes_rollback_target() {
        let mut h = Harness::new();
        let first = TrackingParams::new(1000);
        let second = TrackingParams::new(2000);

        let (_, r1, _) = h.step(|m, o| m.start_tracking(first, location_callbacks(), None, o));
        let (_, r2, _) = h.step(|m, o| m.start_tracking(second, location_callbacks(), None, o));

        h.respond(r1[0].request_id, LocationResponse::Success);
        h.respond(r2[0].request_id, LocationResponse::UnknownFailure);
        assert_eq!(h.machine.state(SessionAxis::Tracking), SessionState::Tracking(first));
    }

    #[test]
    fn test_identical_start_joins_in_flight_request() {
        let mut h = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let params = TrackingParams::new(1000);

        let (_, r1, _) = h.step(|m, o| {
            m.start_tracking(params, location_callbacks(), Some(recording_response(&log)), o)
        });
        let (accepted, r2, d2) = h.step(|m, o| {
            m.start_tracking(params, location_callbacks(), Some(recording_response(&log)), o)
        });
        assert!(accepted);
        assert!(r2.is_empty());
        assert!(d2.is_empty());

        let deliveries = h.respond(r1[0].request_id, LocationResponse::Success);
        assert_eq!(deliveries.len(), 2);
        for d in deliveries {
            d.run();
        }
        assert_eq!(*log.lock(), vec![LocationResponse::Success; 2]);
    }

    #[test]
    fn test_identical_start_after_ack_skips_engine() {
        let mut h = Harness::new();
        let params = TrackingParams::new(1000);
        let (_, r1, _) = h.step(|m, o| m.start_tracking(params, location_callbacks(), None, o));
        h.respond(r1[0].request_id, LocationResponse::Success);

        let log = Arc::new(Mutex::new(Vec::new()));
        let (_, requests, deliveries) = h.step(|m, o| {
            m.start_tracking(params, location_callbacks(), Some(recording_response(&log)), o)
        });
        assert!(requests.is_empty());
        assert_eq!(kinds(&deliveries), vec![DeliveryKind::Response]);
        for d in deliveries {
            d.run();
        }
        assert_eq!(*log.lock(), vec![LocationResponse::Success]);
    }

    #[test]
    fn test_passive_start_stops_engine_session() {
        let mut h = Harness::new();
        let (_, r1, _) =
            h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), None, o));
        h.respond(r1[0].request_id, LocationResponse::Success);

        let log = Arc::new(Mutex::new(Vec::new()));
        let passive = TrackingParams::new(0);
        let (_, requests, deliveries) = h.step(|m, o| {
            m.start_tracking(passive, location_callbacks(), Some(recording_response(&log)), o)
        });

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].command, EngineCommand::StopTracking);
        assert_eq!(kinds(&deliveries), vec![DeliveryKind::Response]);
        assert_eq!(h.machine.state(SessionAxis::Tracking), SessionState::Tracking(passive));
        assert!(!h.machine.is_pending(SessionAxis::Tracking));
    }

    #[test]
    fn test_listener_reports_reach_only_passive_sessions() {
        let mut h = Harness::new();
        let (_, r1, _) =
            h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), None, o));
        h.respond(r1[0].request_id, LocationResponse::Success);

        let (routed, _, _) = h.step(|m, o| {
            m.route_tracking(&positions(), RunningEngines::SPE, ReportAudience::Listener, o)
        });
        assert_eq!(routed, 0);

        h.step(|m, o| m.start_tracking(TrackingParams::new(0), location_callbacks(), None, o));
        let (routed, _, deliveries) = h.step(|m, o| {
            m.route_tracking(&positions(), RunningEngines::SPE, ReportAudience::Listener, o)
        });
        assert_eq!(routed, 1);
        assert_eq!(deliveries.len(), 1);
    }

    #[test]
    fn test_stop_tracking_advances_epoch_and_stops_engine() {
        let mut h = Harness::new();
        let (_, r1, _) =
            h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), None, o));
        h.respond(r1[0].request_id, LocationResponse::Success);
        let epoch = h.epochs.current(SessionAxis::Tracking);

        let (stopped, requests, _) = h.step(|m, o| m.stop_tracking(o));
        assert!(stopped);
        assert_eq!(requests[0].command, EngineCommand::StopTracking);
        assert!(h.epochs.current(SessionAxis::Tracking) > epoch);
        assert!(h.machine.state(SessionAxis::Tracking).is_idle());

        let (routed, _, _) = h.step(|m, o| {
            m.route_tracking(&positions(), RunningEngines::SPE, ReportAudience::Owner, o)
        });
        assert_eq!(routed, 0);
    }

    #[test]
    fn test_stop_while_pending_still_answers_waiters() {
        let mut h = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_, r1, _) = h.step(|m, o| {
            m.start_tracking(TrackingParams::new(1000), location_callbacks(), Some(recording_response(&log)), o)
        });
        h.step(|m, o| m.stop_tracking(o));

        let deliveries = h.respond(r1[0].request_id, LocationResponse::Success);
        for d in deliveries {
            d.run();
        }
        assert_eq!(*log.lock(), vec![LocationResponse::Success]);
        assert!(h.machine.state(SessionAxis::Tracking).is_idle());
    }

    #[test]
    fn test_start_batching_noop_rules() {
        let mut h = Harness::new();
        let callback: BatchingCallback = Arc::new(|_, _| {});

        let (accepted, requests, _) =
            h.step(|m, o| m.start_batching(BatchingParams::routine(1000, 0), None, None, o));
        assert!(!accepted);
        assert!(requests.is_empty());

        let (accepted, requests, _) = h.step(|m, o| {
            m.start_batching(BatchingParams::trip(0, 0), Some(Arc::clone(&callback)), None, o)
        });
        assert!(!accepted);
        assert!(requests.is_empty());
        assert!(h.machine.state(SessionAxis::Batching).is_idle());
    }

    #[test]
    fn test_routine_replaces_trip() {
        let mut h = Harness::new();
        let callback: BatchingCallback = Arc::new(|_, _| {});
        let trip = BatchingParams::trip(1000, 5000);
        let routine = BatchingParams::routine(60_000, 0);

        h.step(|m, o| m.start_batching(trip, Some(Arc::clone(&callback)), None, o));
        let (_, requests, _) =
            h.step(|m, o| m.start_batching(routine, Some(Arc::clone(&callback)), None, o));

        assert_eq!(requests[0].command, EngineCommand::StartBatching(routine));
        assert_eq!(h.machine.state(SessionAxis::Batching), SessionState::Batching(routine));
        assert!(h.machine.state(SessionAxis::Tracking).is_idle());
    }

    #[test]
    fn test_trip_done_ends_batching_session() {
        let mut h = Harness::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: BatchingCallback = Arc::new(move |locs, status| {
            seen_clone.lock().push((locs.len(), status));
        });

        let (_, r1, _) = h.step(|m, o| {
            m.start_batching(BatchingParams::trip(1000, 5000), Some(callback), None, o)
        });
        h.respond(r1[0].request_id, LocationResponse::Success);

        let locations = vec![Location::new(0.0, 0.0, 1), Location::new(0.0, 0.1, 2)];
        let (routed, requests, deliveries) =
            h.step(|m, o| m.route_batch(locations, BatchingStatus::Done, o));
        assert!(routed);
        assert!(requests.is_empty(), "the engine already ended the trip");
        assert!(h.machine.state(SessionAxis::Batching).is_idle());

        for d in deliveries {
            d.run();
        }
        assert_eq!(*seen.lock(), vec![(2, BatchingStatus::Done)]);
    }

    #[test]
    fn test_teardown_stops_both_axes() {
        let mut h = Harness::new();
        let callback: BatchingCallback = Arc::new(|_, _| {});
        h.step(|m, o| m.start_tracking(TrackingParams::new(1000), location_callbacks(), None, o));
        h.step(|m, o| m.start_batching(BatchingParams::routine(1000, 0), Some(callback), None, o));

        let (_, requests, _) = h.step(|m, o| m.teardown(o));
        let commands: Vec<_> = requests.into_iter().map(|r| r.command).collect();
        assert_eq!(commands, vec![EngineCommand::StopTracking, EngineCommand::StopBatching]);
    }

    // -------------------------------------------------------------------------
    // Non-contextual replacement
    // -------------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum TrackingOp {
        Start(u32, u32),
        StartEmpty(u32),
        Stop,
    }

    fn tracking_op() -> impl Strategy<Value = TrackingOp> {
        prop_oneof![
            (0u32..5_000, 0u32..100).prop_map(|(i, d)| TrackingOp::Start(i, d)),
            (0u32..5_000).prop_map(TrackingOp::StartEmpty),
            Just(TrackingOp::Stop),
        ]
    }

    proptest! {
        #[test]
        fn prop_tracking_state_depends_only_on_last_call(
            ops in proptest::collection::vec(tracking_op(), 1..24),
            answer_each in any::<bool>(),
        ) {
            let mut h = Harness::new();
            let mut expected = SessionState::Idle;

            for op in &ops {
                let (_, requests, _) = match op {
                    TrackingOp::Start(interval, distance) => {
                        let params = TrackingParams::new(*interval).with_distance(*distance);
                        expected = SessionState::Tracking(params);
                        h.step(|m, o| m.start_tracking(params, location_callbacks(), None, o))
                    }
                    TrackingOp::StartEmpty(interval) => {
                        let params = TrackingParams::new(*interval);
                        h.step(|m, o| m.start_tracking(params, ReportCallbackSet::new(), None, o))
                    }
                    TrackingOp::Stop => {
                        expected = SessionState::Idle;
                        h.step(|m, o| m.stop_tracking(o))
                    }
                };

                if answer_each {
                    for request in requests {
                        if matches!(request.command, EngineCommand::StartTracking(_)) {
                            h.respond(request.request_id, LocationResponse::Success);
                        }
                    }
                }

                prop_assert_eq!(h.machine.state(SessionAxis::Tracking), expected);
            }
        }
    }
}
