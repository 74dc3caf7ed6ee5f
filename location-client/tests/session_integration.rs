//! Integration tests for tracking and batching sessions.
//!
//! These drive a [`LocationClient`] through a [`LocationHub`] backed by the
//! simulated positioning engine:
//! - response-before-report ordering and cancellation on stop
//! - no-op starts, rollback of rejected starts, identical-request suppression
//! - engine stream selection and passive listening
//! - batching replacement under concurrent callers, trip completion
//!
//! Run with: `cargo test --test session_integration`

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use common::{barrier, eventually, fix, hub, hub_with, Recorder, Seen};
use location_client::callbacks::EngineReportCallbacks;
use location_client::engine::{EngineCommand, EngineEvent, SimulatedEngineConfig};
use location_client::types::{
    BatchingStatus, CapabilitiesMask, EngineKind, EngineMask, GnssEnergyConsumed, GnssLocation,
    RunningEngines,
};
use location_client::{
    BatchingParams, LocationClient, LocationResponse, SessionAxis, SessionState, TrackingParams,
};

fn start_commands(engine: &location_client::engine::SimulatedEngine, client: &LocationClient) -> Vec<EngineCommand> {
    engine
        .commands_from(client.id())
        .into_iter()
        .filter(|c| matches!(c, EngineCommand::StartTracking(_) | EngineCommand::StartBatching(_)))
        .collect()
}

// ============================================================================
// Tracking
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_position_session_response_then_reports_until_stop() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();
    client.update_location_system_info_listener(Some(rec.system_info()), None);

    assert!(client.start_position_session(1000, 0, Some(rec.location()), Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));

    engine.emit_fix(Some(client.id()), fix(1.0));
    engine.emit_fix(Some(client.id()), fix(2.0));
    barrier(&engine);
    assert_eq!(rec.until_barrier().await, vec![Seen::Location(1.0), Seen::Location(2.0)]);

    client.stop_position_session();
    assert_eq!(client.session_state(SessionAxis::Tracking), SessionState::Idle);

    engine.emit_fix(Some(client.id()), fix(3.0));
    barrier(&engine);
    assert!(rec.until_barrier().await.is_empty());
    assert!(engine.tracking_clients().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reports_held_until_start_response() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();
    client.update_location_system_info_listener(Some(rec.system_info()), None);

    engine.hold_responses();
    assert!(client.start_position_session(1000, 0, Some(rec.location()), Some(rec.response())));
    assert!(client.is_session_pending(SessionAxis::Tracking));

    // The report overtakes the held response on the event channel.
    engine.emit_fix(Some(client.id()), fix(5.0));
    barrier(&engine);
    assert!(rec.until_barrier().await.is_empty());

    engine.release_responses();
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));
    assert_eq!(rec.next().await, Seen::Location(5.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_without_callback_is_noop() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();
    client.update_location_system_info_listener(Some(rec.system_info()), None);

    assert!(!client.start_position_session(1000, 0, None, Some(rec.response())));
    assert_eq!(client.session_state(SessionAxis::Tracking), SessionState::Idle);
    assert!(engine.commands_from(client.id()).is_empty());

    barrier(&engine);
    assert!(rec.until_barrier().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_start_rolls_back_to_running_session() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    assert!(client.start_position_session(1000, 0, Some(rec.location()), Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));

    engine.set_reject_sessions(true);
    assert!(client.start_position_session(2000, 50, Some(rec.location()), Some(rec.response())));
    assert_eq!(
        client.session_state(SessionAxis::Tracking),
        SessionState::Tracking(TrackingParams::new(2000).with_distance(50))
    );
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::UnknownFailure));

    assert_eq!(
        client.session_state(SessionAxis::Tracking),
        SessionState::Tracking(TrackingParams::new(1000))
    );
    assert!(!client.is_session_pending(SessionAxis::Tracking));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_restart_skips_engine_but_responds() {
    let (hub, engine) = hub_with(SimulatedEngineConfig::default().with_interval_granularity_ms(1000));
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    assert!(client.start_position_session(1500, 0, Some(rec.location()), Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));
    assert_eq!(
        client.effective_params(SessionAxis::Tracking).map(|p| p.interval_ms),
        Some(2000)
    );

    assert!(client.start_position_session(1500, 0, Some(rec.location()), Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));
    assert_eq!(start_commands(&engine, &client).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_streams_follow_running_engines() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let seen: Arc<Mutex<Vec<Vec<EngineKind>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    let mut rec = Recorder::new();
    client.update_location_system_info_listener(Some(rec.system_info()), None);

    let callbacks = EngineReportCallbacks {
        engine_locations: Some(Arc::new(move |fixes: &[GnssLocation]| {
            seen_cb.lock().push(fixes.iter().map(|f| f.engine).collect());
        })),
        ..Default::default()
    };
    assert!(client.start_engine_session(1000, EngineMask::FUSED | EngineMask::PPE, callbacks, Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));

    // SPE alone: fused degrades to SPE, PPE is silently omitted.
    engine.emit_fix(Some(client.id()), fix(1.0));
    barrier(&engine);
    rec.until_barrier().await;

    engine.set_running(RunningEngines::SPE | RunningEngines::PPE);
    engine.emit_fix(Some(client.id()), fix(2.0));
    barrier(&engine);
    rec.until_barrier().await;

    assert_eq!(
        *seen.lock(),
        vec![vec![EngineKind::Spe], vec![EngineKind::Fused, EngineKind::Ppe]]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_passive_listener_receives_other_sessions() {
    let (hub, engine) = hub();
    let owner = LocationClient::new(&hub, None).unwrap();
    let listener = LocationClient::new(&hub, None).unwrap();
    let bystander = LocationClient::new(&hub, None).unwrap();

    let mut owner_rec = Recorder::new();
    let mut listener_rec = Recorder::new();
    let mut bystander_rec = Recorder::new();
    owner.update_location_system_info_listener(Some(owner_rec.system_info()), None);
    listener.update_location_system_info_listener(Some(listener_rec.system_info()), None);
    bystander.update_location_system_info_listener(Some(bystander_rec.system_info()), None);

    assert!(owner.start_position_session(1000, 0, Some(owner_rec.location()), Some(owner_rec.response())));
    assert_eq!(owner_rec.next().await, Seen::Response(LocationResponse::Success));
    assert!(listener.start_position_session(0, 0, Some(listener_rec.location()), Some(listener_rec.response())));
    assert_eq!(listener_rec.next().await, Seen::Response(LocationResponse::Success));
    assert!(bystander.start_position_session(5000, 0, Some(bystander_rec.location()), Some(bystander_rec.response())));
    assert_eq!(bystander_rec.next().await, Seen::Response(LocationResponse::Success));

    engine.emit_fix(Some(owner.id()), fix(7.0));
    barrier(&engine);

    assert_eq!(owner_rec.until_barrier().await, vec![Seen::Location(7.0)]);
    assert_eq!(listener_rec.until_barrier().await, vec![Seen::Location(7.0)]);
    assert!(bystander_rec.until_barrier().await.is_empty());

    // The passive session never reached the engine.
    assert_eq!(start_commands(&engine, &listener).len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broadcast_report_reaches_every_tracking_client() {
    let (hub, engine) = hub();
    let a = LocationClient::new(&hub, None).unwrap();
    let b = LocationClient::new(&hub, None).unwrap();
    let mut rec_a = Recorder::new();
    let mut rec_b = Recorder::new();

    assert!(a.start_position_session(1000, 0, Some(rec_a.location()), Some(rec_a.response())));
    assert!(b.start_position_session(2000, 0, Some(rec_b.location()), Some(rec_b.response())));
    assert_eq!(rec_a.next().await, Seen::Response(LocationResponse::Success));
    assert_eq!(rec_b.next().await, Seen::Response(LocationResponse::Success));

    engine.emit_fix(None, fix(9.0));
    assert_eq!(rec_a.next().await, Seen::Location(9.0));
    assert_eq!(rec_b.next().await, Seen::Location(9.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capabilities_delivered_once() {
    let (hub, engine) = hub_with(SimulatedEngineConfig::default().with_capabilities(CapabilitiesMask::GEOFENCE));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let client = LocationClient::new(
        &hub,
        Some(Arc::new(move |caps| {
            let _ = tx.send(caps);
        })),
    )
    .unwrap();

    let caps = tokio::time::timeout(common::WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(caps, CapabilitiesMask::GEOFENCE);

    engine.emit(EngineEvent::Capabilities {
        client_id: client.id(),
        capabilities: CapabilitiesMask::ALL,
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_energy_query_response_then_energy() {
    let (hub, _engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    assert!(!client.get_gnss_energy_consumed(None, Some(rec.response())));
    assert!(client.get_gnss_energy_consumed(
        Some(Arc::new(move |energy: &GnssEnergyConsumed| {
            let _ = tx.send(energy.total_since_first_boot);
        })),
        Some(rec.response()),
    ));

    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));
    let energy = tokio::time::timeout(common::WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(energy.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_network_availability_forwarded() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();

    client.update_network_availability(false);
    assert!(!engine.network_available());
    client.update_network_availability(true);
    assert!(engine.network_available());
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batching_without_callback_or_rates_is_noop() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let rec = Recorder::new();

    assert!(!client.start_routine_batching(1000, 0, None, Some(rec.response())));
    assert!(!client.start_trip_batching(0, 0, Some(rec.batching()), Some(rec.response())));
    assert_eq!(client.session_state(SessionAxis::Batching), SessionState::Idle);
    assert!(engine.commands_from(client.id()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_batching_starts_leave_last_linearized() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    let (trip_batch, trip_resp) = (rec.batching(), rec.response());
    let (routine_batch, routine_resp) = (rec.batching(), rec.response());
    let client_ref = &client;

    std::thread::scope(|scope| {
        let trip = scope.spawn(move || {
            client_ref.start_trip_batching(1000, 5_000, Some(trip_batch), Some(trip_resp))
        });
        let routine = scope.spawn(move || {
            client_ref.start_routine_batching(2000, 10, Some(routine_batch), Some(routine_resp))
        });
        assert!(trip.join().unwrap());
        assert!(routine.join().unwrap());
    });

    for _ in 0..2 {
        assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));
    }

    let last = start_commands(&engine, &client)
        .into_iter()
        .last()
        .and_then(|c| match c {
            EngineCommand::StartBatching(params) => Some(params),
            _ => None,
        })
        .unwrap();
    assert!(last == BatchingParams::trip(1000, 5_000) || last == BatchingParams::routine(2000, 10));
    assert_eq!(client.session_state(SessionAxis::Batching), SessionState::Batching(last));
    assert!(!client.is_session_pending(SessionAxis::Batching));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trip_done_ends_batching_session() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    assert!(client.start_trip_batching(1000, 500, Some(rec.batching()), Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));

    engine.emit(EngineEvent::Batch {
        client_id: client.id(),
        locations: vec![fix(1.0), fix(1.1)],
        status: BatchingStatus::Active,
    });
    engine.emit(EngineEvent::Batch {
        client_id: client.id(),
        locations: vec![fix(1.2)],
        status: BatchingStatus::Done,
    });

    assert_eq!(rec.next().await, Seen::Batch(2, BatchingStatus::Active));
    assert_eq!(rec.next().await, Seen::Batch(1, BatchingStatus::Done));
    assert_eq!(client.session_state(SessionAxis::Batching), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulated_trip_runs_to_completion() {
    let (hub, engine) = hub_with(SimulatedEngineConfig::default().with_motion((0.0, 0.0), 100.0, 0.0));
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    assert!(client.start_trip_batching(1000, 250, Some(rec.batching()), Some(rec.response())));
    assert_eq!(rec.next().await, Seen::Response(LocationResponse::Success));

    for t in 0..5 {
        engine.step(t * 1000);
    }

    assert_eq!(rec.next().await, Seen::Batch(4, BatchingStatus::Done));
    assert!(eventually(|| async { client.session_state(SessionAxis::Batching) == SessionState::Idle }).await);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_client_stops_engine_sessions() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    assert!(client.start_position_session(1000, 0, Some(rec.location()), Some(rec.response())));
    assert!(client.start_routine_batching(1000, 0, Some(rec.batching()), Some(rec.response())));
    rec.next().await;
    rec.next().await;
    assert_eq!(engine.tracking_clients().len(), 1);
    assert_eq!(hub.metrics().active_clients, 1);

    drop(client);

    assert!(engine.tracking_clients().is_empty());
    assert!(engine.batching_clients().is_empty());
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.metrics().active_clients, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_after_shutdown_is_rejected() {
    let (hub, _engine) = hub();
    hub.shutdown_and_wait().await;
    assert!(LocationClient::new(&hub, None).is_err());
}

#[test]
fn test_hub_requires_runtime() {
    let (engine, events) =
        location_client::engine::SimulatedEngine::channel(SimulatedEngineConfig::default());
    let err = location_client::LocationHub::start(Default::default(), engine, events).unwrap_err();
    assert!(matches!(err, location_client::LocationError::NoRuntime(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_count_routed_reports() {
    let (hub, engine) = hub();
    let client = LocationClient::new(&hub, None).unwrap();
    let mut rec = Recorder::new();

    assert!(client.start_position_session(1000, 0, Some(rec.location()), Some(rec.response())));
    rec.next().await;
    engine.emit_fix(Some(client.id()), fix(1.0));
    rec.next().await;

    let snapshot = hub.metrics();
    assert!(snapshot.events_received >= 3);
    assert_eq!(snapshot.reports_routed, 1);
    assert_eq!(snapshot.responses_delivered, 1);
}
