//! Hub, router and client configuration.
//!
//! Every setting has a default; a hub can be built from
//! [`HubConfig::default()`] and tuned with the `with_*` builders, or loaded
//! from an INI file:
//!
//! ```ini
//! [router]
//! evict_orphaned_geofences = true
//!
//! [client]
//! max_buffered_reports = 64
//! dispatcher_thread_prefix = loc-dispatch
//! ```
//!
//! Unknown sections and keys are ignored.

use std::path::Path;
use std::str::FromStr;

use ini::{Ini, Properties};

use crate::error::ConfigError;

/// Default number of reports held per axis while a start is unanswered.
pub const DEFAULT_MAX_BUFFERED_REPORTS: usize = 64;

/// Default name prefix of client dispatcher threads.
pub const DEFAULT_DISPATCHER_THREAD_PREFIX: &str = "loc-dispatch";

/// Configuration of the engine report router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Ask the engine to drop geofences whose owning client is gone.
    pub evict_orphaned_geofences: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            evict_orphaned_geofences: true,
        }
    }
}

impl RouterConfig {
    pub fn with_evict_orphaned_geofences(mut self, evict: bool) -> Self {
        self.evict_orphaned_geofences = evict;
        self
    }
}

/// Configuration applied to every client of a hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Reports held per session axis while its start response is
    /// outstanding. The oldest is dropped when full.
    pub max_buffered_reports: usize,

    /// Dispatcher threads are named `{prefix}-{client id}`.
    pub dispatcher_thread_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_buffered_reports: DEFAULT_MAX_BUFFERED_REPORTS,
            dispatcher_thread_prefix: DEFAULT_DISPATCHER_THREAD_PREFIX.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_max_buffered_reports(mut self, max: usize) -> Self {
        self.max_buffered_reports = max;
        self
    }

    pub fn with_dispatcher_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dispatcher_thread_prefix = prefix.into();
        self
    }
}

/// Top-level configuration passed to [`LocationHub::start`](crate::client::LocationHub::start).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HubConfig {
    pub router: RouterConfig,
    pub client: ClientConfig,
}

impl HubConfig {
    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Parse INI text. Missing keys keep their defaults.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    /// Load an INI file. Missing keys keep their defaults.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(router) = ini.section(Some("router")) {
            if let Some(evict) = parse_key::<bool>(router, "router", "evict_orphaned_geofences", "expected true or false")? {
                config.router.evict_orphaned_geofences = evict;
            }
        }

        if let Some(client) = ini.section(Some("client")) {
            if let Some(max) =
                parse_key::<usize>(client, "client", "max_buffered_reports", "expected an unsigned integer")?
            {
                config.client.max_buffered_reports = max;
            }
            if let Some(prefix) = client.get("dispatcher_thread_prefix") {
                let prefix = prefix.trim();
                if prefix.is_empty() {
                    return Err(invalid("client", "dispatcher_thread_prefix", prefix, "must not be empty"));
                }
                config.client.dispatcher_thread_prefix = prefix.to_string();
            }
        }

        Ok(config)
    }
}

fn parse_key<T: FromStr>(
    properties: &Properties,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = properties.get(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| invalid(section, key, raw, reason))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
