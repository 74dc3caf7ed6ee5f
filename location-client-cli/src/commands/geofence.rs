//! Geofence command - register circular geofences and print breaches.
//!
//! The simulated device starts at the origin and moves along its heading. By
//! default the geofences are centered on the origin, so each reports an exit
//! once the device has traveled past its radius.

use std::sync::Arc;

use clap::Args;
use location_client::callbacks::{CollectiveResponseCallback, GeofenceBreachCallback};
use location_client::types::{GeofenceBreachMask, Location};
use location_client::{Geofence, LocationClient, LocationResponse};
use serde_json::json;

use super::common::{breach_mask, BreachArg, Printer, SimArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the geofence command.
#[derive(Debug, Args)]
pub struct GeofenceArgs {
    /// Geofence center latitude (defaults to the simulated origin)
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Geofence center longitude (defaults to the simulated origin)
    #[arg(long, allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Geofence radii in meters, one concentric geofence per radius
    #[arg(long, value_delimiter = ',', default_values_t = vec![50.0, 200.0])]
    pub radius_m: Vec<f64>,

    /// Transitions to report
    #[arg(long, value_enum, value_delimiter = ',')]
    pub breach: Vec<BreachArg>,

    /// Geofence responsiveness in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub responsiveness_ms: u32,

    /// Dwell time in milliseconds for dwell transitions
    #[arg(long, default_value_t = 0)]
    pub dwell_ms: u32,

    #[command(flatten)]
    pub sim: SimArgs,
}

/// Run the geofence command.
pub fn run(runner: &CliRunner, printer: Printer, args: GeofenceArgs) -> Result<(), CliError> {
    args.sim.validate()?;
    if let Some(radius) = args.radius_m.iter().find(|r| **r <= 0.0) {
        return Err(CliError::InvalidArgument(format!(
            "geofence radius {} must be positive",
            radius
        )));
    }
    runner.log_startup("geofence");

    let center_lat = args.lat.unwrap_or(args.sim.origin_lat);
    let center_lon = args.lon.unwrap_or(args.sim.origin_lon);
    if !(-90.0..=90.0).contains(&center_lat) || !(-180.0..=180.0).contains(&center_lon) {
        return Err(CliError::InvalidArgument(format!(
            "geofence center ({}, {}) is out of range",
            center_lat, center_lon
        )));
    }
    let breach_types = breach_mask(&args.breach);
    let (end, snapshot) = runner.run(args.sim.engine_config(), args.sim.duration(), |session| {
        let client = LocationClient::new(&session.hub, None)?;

        let mut geofences: Vec<Geofence> = args
            .radius_m
            .iter()
            .map(|radius| {
                Geofence::new(
                    center_lat,
                    center_lon,
                    *radius,
                    breach_types,
                    args.responsiveness_ms,
                    args.dwell_ms,
                )
            })
            .collect();

        let breach: GeofenceBreachCallback = Arc::new(
            move |fences: &[Geofence], location: &Location, breach: GeofenceBreachMask, timestamp: u64| {
                let radii: Vec<f64> = fences.iter().map(Geofence::radius_m).collect();
                printer.event(
                    "breach",
                    json!({
                        "breach": breach_name(breach),
                        "radii_m": radii,
                        "location": location,
                        "timestamp": timestamp,
                    }),
                    format!(
                        "{:<10} {} geofence(s) {:?} m at {:.6}, {:.6}",
                        breach_name(breach),
                        fences.len(),
                        radii,
                        location.latitude,
                        location.longitude
                    ),
                );
            },
        );
        let collective: CollectiveResponseCallback =
            Arc::new(move |outcomes: &[(Geofence, LocationResponse)]| {
                for (geofence, response) in outcomes {
                    printer.event(
                        "geofence_response",
                        json!({ "radius_m": geofence.radius_m(), "response": response }),
                        format!("geofence {} m: {}", geofence.radius_m(), response),
                    );
                }
            });

        if !client.add_geofences(&mut geofences, Some(breach), Some(collective)) {
            return Err(CliError::Rejected("no geofence was added".to_string()));
        }

        printer.note(format!(
            "Watching {} geofence(s) at ({:.4}, {:.4}), moving {} m/s. Press Ctrl+C to stop.",
            geofences.len(),
            center_lat,
            center_lon,
            args.sim.speed_mps
        ));
        Ok(vec![client])
    })?;

    printer.summary(end, &snapshot);
    Ok(())
}

fn breach_name(breach: GeofenceBreachMask) -> &'static str {
    if breach.contains(GeofenceBreachMask::ENTER) {
        "enter"
    } else if breach.contains(GeofenceBreachMask::EXIT) {
        "exit"
    } else if breach.contains(GeofenceBreachMask::DWELL_IN) {
        "dwell-in"
    } else if breach.contains(GeofenceBreachMask::DWELL_OUT) {
        "dwell-out"
    } else {
        "unknown"
    }
}
