//! Common types and utilities shared across CLI commands.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use location_client::callbacks::ResponseCallback;
use location_client::engine::SimulatedEngineConfig;
use location_client::telemetry::TelemetrySnapshot;
use location_client::types::{EngineMask, GeofenceBreachMask, Location};
use location_client::LocationResponse;
use serde_json::{json, Value};

use crate::error::CliError;
use crate::runner::RunEnd;

/// Writes one line per event, as text or as JSON.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `text`, or `{"event": event, ...fields}` in JSON mode.
    pub fn event(&self, event: &str, fields: Value, text: impl Display) {
        if self.json {
            let mut object = json!({ "event": event });
            if let (Some(target), Value::Object(fields)) = (object.as_object_mut(), fields) {
                target.extend(fields);
            }
            println!("{}", object);
        } else {
            println!("{}", text);
        }
    }

    /// Human-facing message; suppressed in JSON mode.
    pub fn note(&self, text: impl Display) {
        if !self.json {
            println!("{}", text);
        }
    }

    pub fn location(&self, label: &str, location: &Location) {
        self.event(
            label,
            json!({ "location": location }),
            format!(
                "{:<10} {:>11.6} {:>11.6}  acc {:>5.1} m  t={}",
                label,
                location.latitude,
                location.longitude,
                location.horizontal_accuracy,
                location.timestamp
            ),
        );
    }

    /// Response callback that prints `label: outcome`.
    pub fn response_callback(&self, label: &'static str) -> ResponseCallback {
        let printer = *self;
        Arc::new(move |response: LocationResponse| {
            printer.event(
                "response",
                json!({ "request": label, "response": response }),
                format!("{}: {}", label, response),
            );
        })
    }

    pub fn summary(&self, end: RunEnd, snapshot: &TelemetrySnapshot) {
        let reason = match end {
            RunEnd::Elapsed => "duration elapsed",
            RunEnd::Completed => "completed",
            RunEnd::Interrupted => "interrupted",
        };
        self.event(
            "summary",
            json!({ "end": reason, "telemetry": snapshot }),
            format!("\nStopped ({}).\n{}", reason, snapshot),
        );
    }
}

/// Position engine selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EngineArg {
    /// Fused/default position
    Fused,
    /// Standard position engine
    Spe,
    /// Precise position engine
    Ppe,
}

/// Combine engine arguments into a mask. Empty means the fused stream.
pub fn engine_mask(engines: &[EngineArg]) -> EngineMask {
    if engines.is_empty() {
        return EngineMask::FUSED;
    }
    engines.iter().fold(EngineMask::NONE, |mask, engine| {
        mask | match engine {
            EngineArg::Fused => EngineMask::FUSED,
            EngineArg::Spe => EngineMask::SPE,
            EngineArg::Ppe => EngineMask::PPE,
        }
    })
}

/// Geofence transition selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum BreachArg {
    Enter,
    Exit,
    DwellIn,
    DwellOut,
    /// Every transition
    All,
}

/// Combine breach arguments into a mask. Empty means enter and exit.
pub fn breach_mask(breaches: &[BreachArg]) -> GeofenceBreachMask {
    if breaches.is_empty() {
        return GeofenceBreachMask::ENTER | GeofenceBreachMask::EXIT;
    }
    breaches.iter().fold(GeofenceBreachMask::NONE, |mask, breach| {
        mask | match breach {
            BreachArg::Enter => GeofenceBreachMask::ENTER,
            BreachArg::Exit => GeofenceBreachMask::EXIT,
            BreachArg::DwellIn => GeofenceBreachMask::DWELL_IN,
            BreachArg::DwellOut => GeofenceBreachMask::DWELL_OUT,
            BreachArg::All => GeofenceBreachMask::ALL,
        }
    })
}

/// Simulated device motion and run length.
#[derive(Debug, Clone, Args)]
pub struct SimArgs {
    /// Starting latitude of the simulated device
    #[arg(long, default_value_t = 37.4220, allow_negative_numbers = true)]
    pub origin_lat: f64,

    /// Starting longitude of the simulated device
    #[arg(long, default_value_t = -122.0841, allow_negative_numbers = true)]
    pub origin_lon: f64,

    /// Simulated ground speed in meters per second
    #[arg(long, default_value_t = 10.0)]
    pub speed_mps: f64,

    /// Simulated heading in degrees clockwise from north
    #[arg(long, default_value_t = 90.0)]
    pub bearing_deg: f64,

    /// Stop after this many seconds (0 runs until Ctrl+C)
    #[arg(long, default_value_t = 10)]
    pub duration_secs: u64,

    /// Also run the precise position engine
    #[arg(long)]
    pub ppe: bool,
}

impl SimArgs {
    pub fn validate(&self) -> Result<(), CliError> {
        if !(-90.0..=90.0).contains(&self.origin_lat) {
            return Err(CliError::InvalidArgument(format!(
                "origin latitude {} is outside -90..90",
                self.origin_lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.origin_lon) {
            return Err(CliError::InvalidArgument(format!(
                "origin longitude {} is outside -180..180",
                self.origin_lon
            )));
        }
        if self.speed_mps < 0.0 {
            return Err(CliError::InvalidArgument("speed must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> SimulatedEngineConfig {
        use location_client::types::RunningEngines;

        let running = if self.ppe {
            RunningEngines::SPE | RunningEngines::PPE
        } else {
            RunningEngines::SPE
        };
        SimulatedEngineConfig::default()
            .with_running(running)
            .with_motion((self.origin_lat, self.origin_lon), self.speed_mps, self.bearing_deg)
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }
}
