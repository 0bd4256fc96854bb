//! Scheduler and simulation configuration.

pub mod options;
pub mod sim_config;

use std::path::PathBuf;

use thiserror::Error;

pub use options::{parse_config_value, parse_options};
pub use sim_config::{MachineConfig, SchedulerConfig, SimulationConfig, SlaSlackConfig, WorkloadConfig};

/// Failure to load or validate configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
