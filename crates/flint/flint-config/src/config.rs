use serde::Deserialize;
use std::path::Path;

/// Settings shared by the `flint-send` / `flint-recv` demo processes.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    #[serde(default = "defaults::spsc_shm_name")]
    pub spsc_shm_name: String,
    #[serde(default = "defaults::spmc_shm_name")]
    pub spmc_shm_name: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::producer_core")]
    pub producer_core: usize,
    #[serde(default = "defaults::consumer_core")]
    pub consumer_core: usize,
    /// Messages the sender publishes before it stops.
    #[serde(default = "defaults::messages")]
    pub messages: u64,
    /// Ticks the sender idles between two messages.
    #[serde(default = "defaults::pace_ticks")]
    pub pace_ticks: u64,
    /// A receiver that sees nothing for this long assumes the sender is gone.
    #[serde(default = "defaults::idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("unknown mode '{0}', expected 'spsc' or 'spmc'")]
    UnknownMode(String),
}

mod defaults {
    pub fn spsc_shm_name() -> String {
        "flint_spsc".into()
    }

    pub fn spmc_shm_name() -> String {
        "flint_spmc".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn producer_core() -> usize {
        1
    }

    pub fn consumer_core() -> usize {
        2
    }

    pub fn messages() -> u64 {
        1_000_000
    }

    pub fn pace_ticks() -> u64 {
        1_000
    }

    pub fn idle_timeout_ms() -> u64 {
        5_000
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            spsc_shm_name: defaults::spsc_shm_name(),
            spmc_shm_name: defaults::spmc_shm_name(),
            log_level: defaults::log_level(),
            producer_core: defaults::producer_core(),
            consumer_core: defaults::consumer_core(),
            messages: defaults::messages(),
            pace_ticks: defaults::pace_ticks(),
            idle_timeout_ms: defaults::idle_timeout_ms(),
        }
    }
}

impl DemoConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
