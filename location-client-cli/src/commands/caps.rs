//! Caps command - print the service capabilities and GNSS energy use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use location_client::callbacks::{CapabilitiesCallback, EnergyConsumedCallback};
use location_client::engine::SimulatedEngineConfig;
use location_client::types::{CapabilitiesMask, GnssEnergyConsumed};
use location_client::LocationClient;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::common::Printer;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Both the capabilities and the energy answer.
const EXPECTED_ANSWERS: usize = 2;

const CAPABILITY_NAMES: [(CapabilitiesMask, &str); 6] = [
    (CapabilitiesMask::TIME_BASED_TRACKING, "time-based tracking"),
    (CapabilitiesMask::TIME_BASED_BATCHING, "time-based batching"),
    (CapabilitiesMask::DISTANCE_BASED_TRACKING, "distance-based tracking"),
    (CapabilitiesMask::DISTANCE_BASED_BATCHING, "distance-based batching"),
    (CapabilitiesMask::GEOFENCE, "geofence"),
    (CapabilitiesMask::OUTDOOR_TRIP_BATCHING, "outdoor trip batching"),
];

/// Run the caps command.
pub fn run(runner: &CliRunner, printer: Printer) -> Result<(), CliError> {
    runner.log_startup("caps");

    let (end, _) = runner.run(
        SimulatedEngineConfig::default(),
        Some(Duration::from_secs(5)),
        |session| {
            let answers = Arc::new(AtomicUsize::new(0));

            let capabilities: CapabilitiesCallback = {
                let answers = Arc::clone(&answers);
                let done = session.done.clone();
                Arc::new(move |mask: CapabilitiesMask| {
                    let names = capability_names(mask);
                    printer.event(
                        "capabilities",
                        json!({ "bits": mask.bits(), "names": names }),
                        format!("Capabilities:\n  {}", names.join("\n  ")),
                    );
                    answered(&answers, &done);
                })
            };
            let energy: EnergyConsumedCallback = {
                let done = session.done.clone();
                Arc::new(move |energy: &GnssEnergyConsumed| {
                    let text = match energy.total_since_first_boot {
                        Some(total) => format!("GNSS energy since first boot: {} units", total),
                        None => "GNSS energy since first boot: unknown".to_string(),
                    };
                    printer.event("energy", json!({ "energy": energy }), text);
                    answered(&answers, &done);
                })
            };

            let client = LocationClient::new(&session.hub, Some(capabilities))?;
            client.get_gnss_energy_consumed(Some(energy), None);
            Ok(vec![client])
        },
    )?;

    if end != crate::runner::RunEnd::Completed {
        return Err(CliError::Rejected("the service did not answer".to_string()));
    }
    Ok(())
}

fn answered(answers: &AtomicUsize, done: &CancellationToken) {
    if answers.fetch_add(1, Ordering::SeqCst) + 1 == EXPECTED_ANSWERS {
        done.cancel();
    }
}

fn capability_names(mask: CapabilitiesMask) -> Vec<&'static str> {
    CAPABILITY_NAMES
        .iter()
        .filter(|(flag, _)| mask.contains(*flag))
        .map(|(_, name)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names() {
        assert_eq!(capability_names(CapabilitiesMask::NONE), Vec::<&str>::new());
        assert_eq!(
            capability_names(CapabilitiesMask::GEOFENCE | CapabilitiesMask::TIME_BASED_TRACKING),
            vec!["time-based tracking", "geofence"]
        );
        assert_eq!(capability_names(CapabilitiesMask::ALL).len(), 6);
    }

    #[test]
    fn test_done_after_both_answers() {
        let answers = AtomicUsize::new(0);
        let done = CancellationToken::new();
        answered(&answers, &done);
        assert!(!done.is_cancelled());
        answered(&answers, &done);
        assert!(done.is_cancelled());
    }
}
