//! Track command - run a tracking session and print its reports.

use std::sync::Arc;

use clap::Args;
use location_client::callbacks::{EngineReportCallbacks, GnssReportCallbacks};
use location_client::types::{GnssLocation, GnssSv, Location, NmeaSentence};
use location_client::LocationClient;
use serde_json::json;

use super::common::{engine_mask, EngineArg, Printer, SimArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the track command.
#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Requested report interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u32,

    /// Minimum distance between reports in meters (0 reports by time only)
    #[arg(long, default_value_t = 0)]
    pub distance_m: u32,

    /// Report GNSS detail (satellites and NMEA) instead of plain positions
    #[arg(long, conflicts_with = "engines")]
    pub gnss: bool,

    /// Report per-engine positions for these engines
    #[arg(long, value_enum, value_delimiter = ',')]
    pub engines: Vec<EngineArg>,

    /// Number of extra passive clients that listen without a session
    #[arg(long, default_value_t = 0)]
    pub listeners: usize,

    #[command(flatten)]
    pub sim: SimArgs,
}

/// Run the track command.
pub fn run(runner: &CliRunner, printer: Printer, args: TrackArgs) -> Result<(), CliError> {
    args.sim.validate()?;
    if args.interval_ms == 0 {
        return Err(CliError::InvalidArgument(
            "interval must be positive; use --listeners for passive clients".to_string(),
        ));
    }
    runner.log_startup("track");

    let (end, snapshot) = runner.run(args.sim.engine_config(), args.sim.duration(), |session| {
        let client = LocationClient::new(&session.hub, None)?;
        let response = Some(printer.response_callback("start tracking"));

        let accepted = if args.gnss {
            client.start_gnss_session(args.interval_ms, gnss_callbacks(printer), response)
        } else if !args.engines.is_empty() {
            client.start_engine_session(
                args.interval_ms,
                engine_mask(&args.engines),
                engine_callbacks(printer),
                response,
            )
        } else {
            client.start_position_session(
                args.interval_ms,
                args.distance_m,
                Some(Arc::new(move |loc: &Location| printer.location("location", loc))),
                response,
            )
        };
        if !accepted {
            return Err(CliError::Rejected("tracking session was not started".to_string()));
        }

        let mut clients = vec![client];
        for index in 0..args.listeners {
            let listener = LocationClient::new(&session.hub, None)?;
            let label = format!("listener-{}", index + 1);
            listener.start_position_session(
                0,
                0,
                Some(Arc::new(move |loc: &Location| printer.location(&label, loc))),
                None,
            );
            clients.push(listener);
        }

        printer.note(format!(
            "Tracking every {} ms from ({:.4}, {:.4}). Press Ctrl+C to stop.",
            args.interval_ms, args.sim.origin_lat, args.sim.origin_lon
        ));
        Ok(clients)
    })?;

    printer.summary(end, &snapshot);
    Ok(())
}

fn gnss_callbacks(printer: Printer) -> GnssReportCallbacks {
    GnssReportCallbacks {
        gnss_location: Some(Arc::new(move |loc: &GnssLocation| {
            printer.location("gnss", &loc.location);
        })),
        sv_list: Some(Arc::new(move |svs: &[GnssSv]| {
            let used = svs.iter().filter(|sv| sv.used_in_fix).count();
            printer.event(
                "sv_list",
                json!({ "visible": svs.len(), "used": used }),
                format!("{:<10} {} visible, {} used in fix", "sv", svs.len(), used),
            );
        })),
        nmea: Some(Arc::new(move |nmea: &NmeaSentence| {
            printer.event(
                "nmea",
                json!({ "timestamp": nmea.timestamp, "sentence": nmea.sentence }),
                format!("{:<10} {}", "nmea", nmea.sentence),
            );
        })),
        ..Default::default()
    }
}

fn engine_callbacks(printer: Printer) -> EngineReportCallbacks {
    EngineReportCallbacks {
        engine_locations: Some(Arc::new(move |locations: &[GnssLocation]| {
            for loc in locations {
                printer.location(&loc.engine.to_string(), &loc.location);
            }
        })),
        ..Default::default()
    }
}
