//! Delivery planning for tracking reports.
//!
//! Pure functions deciding which engine stream feeds which callback of a
//! client, given the engines currently running. Nothing here touches client
//! state; the session state machine wraps the resulting jobs in gated
//! deliveries.
//!
//! Stream resolution:
//!
//! | requested | running            | delivered                         |
//! |-----------|--------------------|-----------------------------------|
//! | Fused     | 2+ engines         | the fused entry                   |
//! | Fused     | exactly one engine | that engine's entry, unmodified   |
//! | Spe / Ppe | engine running     | that engine's entry               |
//! | Spe / Ppe | engine not running | nothing (silently omitted)        |
//!
//! `Location` and `GnssLocation` callbacks always receive the default stream
//! (whatever Fused resolves to); `EngineLocations` receives one entry per
//! requested engine that resolves.

use std::sync::Arc;

use crate::callbacks::{ReportCallback, ReportCallbackSet, ReportKind};
use crate::dispatcher::Job;
use crate::engine::TrackingReport;
use crate::types::{EngineKind, EngineMask, GnssLocation, RunningEngines};

/// Which clients a tracking report is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportAudience {
    /// The report belongs to this client's session, or to everybody.
    Owner,
    /// The report belongs to another client's session; only passive
    /// listeners pick it up.
    Listener,
}

/// The entry of `positions` that feeds requested stream `kind`.
pub fn resolve_stream(
    kind: EngineKind,
    running: RunningEngines,
    positions: &[GnssLocation],
) -> Option<&GnssLocation> {
    if !running.produces(kind) {
        return None;
    }

    let find = |wanted: EngineKind| positions.iter().find(|p| p.engine == wanted);
    match kind {
        EngineKind::Fused if running.has_fused_stream() => find(EngineKind::Fused),
        EngineKind::Fused => find(EngineKind::Spe).or_else(|| positions.first()),
        other => find(other),
    }
}

/// The stream `Location` and `GnssLocation` callbacks receive.
pub fn default_stream(running: RunningEngines, positions: &[GnssLocation]) -> Option<&GnssLocation> {
    resolve_stream(EngineKind::Fused, running, positions)
}

/// One entry per requested engine that resolves, in [`EngineKind::ALL`] order.
pub fn engine_streams(
    engines: EngineMask,
    running: RunningEngines,
    positions: &[GnssLocation],
) -> Vec<GnssLocation> {
    engines
        .kinds()
        .filter_map(|kind| resolve_stream(kind, running, positions))
        .cloned()
        .collect()
}

/// Report kinds a tracking report can feed.
pub fn report_kinds(report: &TrackingReport) -> &'static [ReportKind] {
    match report {
        TrackingReport::Positions(_) => &[
            ReportKind::Location,
            ReportKind::GnssLocation,
            ReportKind::EngineLocations,
        ],
        TrackingReport::SvList(_) => &[ReportKind::SvList],
        TrackingReport::Nmea(_) => &[ReportKind::Nmea],
        TrackingReport::GnssData(_) => &[ReportKind::GnssData],
        TrackingReport::Measurements(_) => &[ReportKind::Measurements],
        TrackingReport::SvPoly(_) => &[ReportKind::SvPoly],
    }
}

/// Callback invocations `report` produces for one client, in kind order.
pub fn report_jobs(
    report: &Arc<TrackingReport>,
    engines: EngineMask,
    running: RunningEngines,
    callbacks: &ReportCallbackSet,
) -> Vec<Job> {
    let mut jobs: Vec<Job> = Vec::new();

    for &kind in report_kinds(report) {
        let Some(callback) = callbacks.get(kind) else {
            continue;
        };

        match (callback.clone(), report.as_ref()) {
            (ReportCallback::Location(cb), TrackingReport::Positions(positions)) => {
                if let Some(fix) = default_stream(running, positions) {
                    let location = fix.location.clone();
                    jobs.push(Box::new(move || cb(&location)));
                }
            }
            (ReportCallback::GnssLocation(cb), TrackingReport::Positions(positions)) => {
                if let Some(fix) = default_stream(running, positions) {
                    let fix = fix.clone();
                    jobs.push(Box::new(move || cb(&fix)));
                }
            }
            (ReportCallback::EngineLocations(cb), TrackingReport::Positions(positions)) => {
                let streams = engine_streams(engines, running, positions);
                if !streams.is_empty() {
                    jobs.push(Box::new(move || cb(streams.as_slice())));
                }
            }
            (callback, _) => {
                let report = Arc::clone(report);
                jobs.push(Box::new(move || invoke_passthrough(&callback, &report)));
            }
        }
    }

    jobs
}

fn invoke_passthrough(callback: &ReportCallback, report: &TrackingReport) {
    match (callback, report) {
        (ReportCallback::SvList(cb), TrackingReport::SvList(svs)) => cb(svs.as_slice()),
        (ReportCallback::Nmea(cb), TrackingReport::Nmea(nmea)) => cb(nmea),
        (ReportCallback::GnssData(cb), TrackingReport::GnssData(data)) => cb(data),
        (ReportCallback::Measurements(cb), TrackingReport::Measurements(m)) => cb(m),
        (ReportCallback::SvPoly(cb), TrackingReport::SvPoly(poly)) => cb(poly),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Location, NmeaSentence};
    use parking_lot::Mutex;

    fn fix(engine: EngineKind, lat: f64) -> GnssLocation {
        GnssLocation::new(Location::new(lat, 0.0, 0), engine)
    }

    fn spe_and_ppe() -> Vec<GnssLocation> {
        vec![
            fix(EngineKind::Fused, 1.0),
            fix(EngineKind::Spe, 2.0),
            fix(EngineKind::Ppe, 3.0),
        ]
    }

    #[test]
    fn test_fused_resolves_to_fused_entry_with_two_engines() {
        let running = RunningEngines::SPE | RunningEngines::PPE;
        let positions = spe_and_ppe();
        let resolved = resolve_stream(EngineKind::Fused, running, &positions).unwrap();
        assert_eq!(resolved.engine, EngineKind::Fused);
    }

    #[test]
    fn test_fused_degrades_to_spe_when_spe_alone() {
        let positions = vec![fix(EngineKind::Spe, 2.0)];
        let resolved = resolve_stream(EngineKind::Fused, RunningEngines::SPE, &positions).unwrap();
        assert_eq!(resolved.engine, EngineKind::Spe);
        assert_eq!(resolved.location.latitude, 2.0);
    }

    #[test]
    fn test_engine_not_running_is_omitted() {
        let positions = vec![fix(EngineKind::Spe, 2.0)];
        assert!(resolve_stream(EngineKind::Ppe, RunningEngines::SPE, &positions).is_none());

        let streams = engine_streams(EngineMask::SPE | EngineMask::PPE, RunningEngines::SPE, &positions);
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].engine, EngineKind::Spe);
    }

    #[test]
    fn test_nothing_resolves_without_running_engines() {
        let positions = spe_and_ppe();
        assert!(default_stream(RunningEngines::NONE, &positions).is_none());
    }

    #[test]
    fn test_report_jobs_only_for_registered_kinds() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_location = Arc::clone(&seen);
        let seen_engines = Arc::clone(&seen);

        let callbacks = ReportCallbackSet::new()
            .with_location(Arc::new(move |loc| {
                seen_location.lock().push(format!("location {}", loc.latitude))
            }))
            .with_engine_locations(Arc::new(move |fixes| {
                seen_engines.lock().push(format!("engines {}", fixes.len()))
            }));

        let report = Arc::new(TrackingReport::Positions(spe_and_ppe()));
        let running = RunningEngines::SPE | RunningEngines::PPE;
        let jobs = report_jobs(&report, EngineMask::ALL, running, &callbacks);
        assert_eq!(jobs.len(), 2);
        for job in jobs {
            job();
        }
        assert_eq!(*seen.lock(), vec!["location 1", "engines 3"]);

        let nmea = Arc::new(TrackingReport::Nmea(NmeaSentence::default()));
        assert!(report_jobs(&nmea, EngineMask::ALL, running, &callbacks).is_empty());
    }

    #[test]
    fn test_passthrough_report() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let callbacks = ReportCallbackSet::new().with_nmea(Arc::new(move |nmea| {
            *seen_clone.lock() = Some(nmea.sentence.clone());
        }));

        let report = Arc::new(TrackingReport::Nmea(NmeaSentence {
            timestamp: 5,
            sentence: "$GPGGA".to_string(),
        }));
        let jobs = report_jobs(&report, EngineMask::FUSED, RunningEngines::SPE, &callbacks);
        assert_eq!(jobs.len(), 1);
        for job in jobs {
            job();
        }
        assert_eq!(seen.lock().as_deref(), Some("$GPGGA"));
    }
}
