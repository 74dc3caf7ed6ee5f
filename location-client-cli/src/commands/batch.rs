//! Batch command - run a routine or trip batching session.

use std::sync::Arc;

use clap::Args;
use location_client::callbacks::BatchingCallback;
use location_client::types::{BatchingStatus, Location};
use location_client::LocationClient;
use serde_json::json;

use super::common::{Printer, SimArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the batch command.
#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Minimum interval between batched fixes in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u32,

    /// Routine: minimum distance between fixes. Trip: distance to travel.
    #[arg(long, default_value_t = 0)]
    pub distance_m: u32,

    /// Batch an outdoor trip; the session ends once the distance is traveled
    #[arg(long)]
    pub trip: bool,

    /// Fixes per routine batch delivery
    #[arg(long, default_value_t = 5)]
    pub flush_size: usize,

    #[command(flatten)]
    pub sim: SimArgs,
}

/// Run the batch command.
pub fn run(runner: &CliRunner, printer: Printer, args: BatchArgs) -> Result<(), CliError> {
    args.sim.validate()?;
    if args.trip && args.distance_m == 0 {
        return Err(CliError::InvalidArgument(
            "trip batching needs --distance-m".to_string(),
        ));
    }
    if args.flush_size == 0 {
        return Err(CliError::InvalidArgument("flush size must be positive".to_string()));
    }
    runner.log_startup("batch");

    let engine_config = args.sim.engine_config().with_batch_flush_size(args.flush_size);
    let (end, snapshot) = runner.run(engine_config, args.sim.duration(), |session| {
        let client = LocationClient::new(&session.hub, None)?;
        let done = session.done.clone();

        let batching: BatchingCallback = Arc::new(move |locations: &[Location], status: BatchingStatus| {
            let status_text = match status {
                BatchingStatus::Inactive => "inactive",
                BatchingStatus::Active => "active",
                BatchingStatus::Done => "done",
            };
            printer.event(
                "batch",
                json!({ "status": status, "locations": locations }),
                format!("batch ({}): {} fixes", status_text, locations.len()),
            );
            for loc in locations {
                printer.note(format!(
                    "  {:>11.6} {:>11.6}  t={}",
                    loc.latitude, loc.longitude, loc.timestamp
                ));
            }
            if status == BatchingStatus::Done {
                done.cancel();
            }
        });
        let response = Some(printer.response_callback("start batching"));

        let accepted = if args.trip {
            client.start_trip_batching(args.interval_ms, args.distance_m, Some(batching), response)
        } else {
            client.start_routine_batching(args.interval_ms, args.distance_m, Some(batching), response)
        };
        if !accepted {
            return Err(CliError::Rejected("batching session was not started".to_string()));
        }

        printer.note(format!(
            "{} batching every {} ms. Press Ctrl+C to stop.",
            if args.trip { "Trip" } else { "Routine" },
            args.interval_ms
        ));
        Ok(vec![client])
    })?;

    printer.summary(end, &snapshot);
    Ok(())
}
