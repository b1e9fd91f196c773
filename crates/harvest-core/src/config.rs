//! Runtime configuration.
//!
//! Loaded from an optional JSON file, then overlaid by `HARVEST_*` env vars.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::DEFAULT_CACHE_TTL_SECS;

pub const ENV_CACHE_TTL_SECS: &str = "HARVEST_CACHE_TTL_SECS";
pub const ENV_COLLECTOR_TIMEOUT_SECS: &str = "HARVEST_COLLECTOR_TIMEOUT_SECS";
pub const ENV_STORE_ROOT: &str = "HARVEST_STORE_ROOT";
pub const ENV_LOG_JSON: &str = "HARVEST_LOG_JSON";

/// Loading a config file failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// How long a cached metadata/payload/list entry is served.
    #[serde(with = "secs")]
    pub cache_ttl: Duration,

    /// Per-category deadline. `None` means a collector may take as long as it likes.
    #[serde(with = "opt_secs")]
    pub collector_timeout: Option<Duration>,

    /// Root directory for the filesystem object store.
    pub store_root: PathBuf,

    pub log: LogConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS as u64),
            collector_timeout: None,
            store_root: PathBuf::from("./harvest-data"),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `harvest_core=debug`.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl HarvestConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults overlaid by the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|k| std::env::var(k).ok())
    }

    /// Overlay `HARVEST_*` values; unparsable values are ignored with a warning.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup(ENV_CACHE_TTL_SECS) {
            match v.parse::<u64>() {
                Ok(secs) => self.cache_ttl = Duration::from_secs(secs),
                Err(_) => tracing::warn!(var = ENV_CACHE_TTL_SECS, value = %v, "ignoring invalid value"),
            }
        }
        if let Some(v) = lookup(ENV_COLLECTOR_TIMEOUT_SECS) {
            match v.parse::<u64>() {
                Ok(0) => self.collector_timeout = None,
                Ok(secs) => self.collector_timeout = Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!(var = ENV_COLLECTOR_TIMEOUT_SECS, value = %v, "ignoring invalid value")
                }
            }
        }
        if let Some(v) = lookup(ENV_STORE_ROOT) {
            self.store_root = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LOG_JSON) {
            self.log.json = matches!(v.as_str(), "1" | "true" | "yes");
        }
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs))
    }
}
