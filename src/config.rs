//! Layered configuration for the watch engine.
//!
//! Supports default values, a `dynquery.toml` file, and environment
//! variable overrides.
//!
//! # Environment Variables
//!
//! Variables are prefixed with `DYNQUERY_` and use double underscores to
//! separate nested levels:
//! - `DYNQUERY_SETTLE_DELAY_MS=250` sets `settle_delay_ms`
//! - `DYNQUERY_LOGGING__DEFAULT=debug` sets `logging.default`

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::WatchError;

/// Default quiescence window for coalescing insertion bursts.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

const CONFIG_FILE: &str = "dynquery.toml";
const ENV_PREFIX: &str = "DYNQUERY_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Quiescence window in milliseconds applied to sessions that don't set
    /// their own settle delay.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level filter (e.g. "warn", "info", "debug")
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings: defaults, then `dynquery.toml`, then `DYNQUERY_`
    /// environment variables.
    pub fn load() -> Result<Self, WatchError> {
        Self::figment(Toml::file(CONFIG_FILE))
            .extract()
            .map_err(|e| WatchError::Config {
                reason: e.to_string(),
            })
    }

    /// Load settings from a specific TOML file plus environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        Self::figment(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| WatchError::Config {
                reason: e.to_string(),
            })
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
