//! Configuration management.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::retry::RetryPolicy;
use crate::telemetry::LoggingConfig;

/// Environment prefix, e.g. `SNAPLOG__PROTOCOL__USE_INDEPENDENT_EVENT_STORAGE=true`.
pub const ENV_PREFIX: &str = "SNAPLOG";

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Protocol configuration
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Persist entries in the event store instead of inline in the record
    #[serde(default)]
    pub use_independent_event_storage: bool,

    /// When to fold the log into a snapshot
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Retry behaviour for storage access
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            use_independent_event_storage: false,
            snapshot: SnapshotConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot after this many entries since the last snapshot
    #[serde(default = "default_every_n_events")]
    pub every_n_events: Option<u64>,

    /// Snapshot when the last one is older than this
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            every_n_events: default_every_n_events(),
            max_age: None,
        }
    }
}

// Default value functions
fn default_every_n_events() -> Option<u64> {
    Some(5)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
