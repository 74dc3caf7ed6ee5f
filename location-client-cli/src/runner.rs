//! Shared command runner.
//!
//! Every command follows the same shape: load the hub configuration, start a
//! hub on a [`SimulatedEngine`], let the command create its clients, then run
//! until the duration elapses, the command signals completion, or the user
//! presses Ctrl+C. Clients are dropped before the hub shuts down so their
//! sessions and geofences are released on the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use location_client::engine::{SimulatedEngine, SimulatedEngineConfig};
use location_client::telemetry::TelemetrySnapshot;
use location_client::{HubConfig, LocationClient, LocationHub};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CliError;

/// Name of the configuration file looked up in the user config directory.
const CONFIG_FILE_NAME: &str = "config.ini";

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Elapsed,
    Completed,
    Interrupted,
}

/// What a command gets to set up its clients.
pub struct SimSession {
    pub hub: Arc<LocationHub>,
    pub engine: Arc<SimulatedEngine>,
    /// Cancel to end the run early.
    pub done: CancellationToken,
}

pub struct CliRunner {
    config: HubConfig,
    config_path: Option<PathBuf>,
    runtime: Runtime,
}

impl CliRunner {
    /// Load configuration and build the runtime.
    ///
    /// An explicit `config_path` must exist. Without one,
    /// `<config dir>/locctl/config.ini` is used if present, defaults otherwise.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let (config, config_path) = match config_path {
            Some(path) => (HubConfig::from_ini_file(path)?, Some(path.to_path_buf())),
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => (HubConfig::from_ini_file(&path)?, Some(path)),
                None => (HubConfig::default(), None),
            },
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("locctl-rt")
            .enable_all()
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))?;

        Ok(Self {
            config,
            config_path,
            runtime,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        match &self.config_path {
            Some(path) => info!(command, config = %path.display(), "locctl starting"),
            None => info!(command, "locctl starting with default configuration"),
        }
    }

    /// Run one simulated session.
    ///
    /// `setup` creates the clients; they stay alive until the run ends.
    /// `duration == None` runs until completion or Ctrl+C.
    pub fn run<F>(
        &self,
        engine_config: SimulatedEngineConfig,
        duration: Option<Duration>,
        setup: F,
    ) -> Result<(RunEnd, TelemetrySnapshot), CliError>
    where
        F: FnOnce(&SimSession) -> Result<Vec<LocationClient>, CliError>,
    {
        let _guard = self.runtime.enter();

        let (engine, events) = SimulatedEngine::channel(engine_config);
        let hub = LocationHub::start(self.config.clone(), engine.clone(), events)?;
        let session = SimSession {
            hub,
            engine,
            done: CancellationToken::new(),
        };

        let sim_stop = CancellationToken::new();
        let sim_task = session.engine.spawn_report_loop(sim_stop.clone());

        let clients = setup(&session)?;
        debug!(clients = clients.len(), "clients created");

        let end = self.runtime.block_on(wait_for_end(&session.done, duration));
        info!(?end, "run finished");

        // Release sessions and geofences while the hub is still routing.
        drop(clients);
        let snapshot = session.hub.metrics();

        self.runtime.block_on(async {
            sim_stop.cancel();
            let _ = sim_task.await;
            session.hub.shutdown_and_wait().await;
        });

        Ok((end, snapshot))
    }
}

async fn wait_for_end(done: &CancellationToken, duration: Option<Duration>) -> RunEnd {
    let elapsed = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = done.cancelled() => RunEnd::Completed,
        _ = elapsed => RunEnd::Elapsed,
        _ = tokio::signal::ctrl_c() => RunEnd::Interrupted,
    }
}

/// `<config dir>/locctl/config.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("locctl").join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_path_ends_with_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("locctl/config.ini"));
        }
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\nmax_buffered_reports = 8").unwrap();

        let runner = CliRunner::new(Some(file.path())).unwrap();
        assert_eq!(runner.config().client.max_buffered_reports, 8);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CliRunner::new(Some(&dir.path().join("absent.ini")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_run_ends_when_done_is_cancelled() {
        let runner = CliRunner::new(None).unwrap();
        let (end, snapshot) = runner
            .run(SimulatedEngineConfig::default(), Some(Duration::from_secs(30)), |session| {
                let client = LocationClient::new(&session.hub, None)?;
                session.done.cancel();
                Ok(vec![client])
            })
            .unwrap();

        assert_eq!(end, RunEnd::Completed);
        assert_eq!(snapshot.active_clients, 0);
    }
}
