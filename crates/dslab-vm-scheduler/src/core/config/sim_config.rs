//! Simulation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::common::{CpuArch, SlaClass};
use crate::core::config::ConfigError;

/// Holds raw scheduler config parsed from YAML.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawSchedulerConfig {
    pub placement: Option<String>,
    pub vm_memory_overhead: Option<u64>,
    pub rebalance_on_task_complete: Option<bool>,
    pub rebalance_on_periodic_check: Option<bool>,
    pub standby_grace_checks: Option<u32>,
    pub retry_unplaced: Option<bool>,
    pub init_default_vms: Option<bool>,
}

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub scheduler: Option<RawSchedulerConfig>,
    pub machines: Option<Vec<MachineConfig>>,
    pub periodic_check_interval: Option<f64>,
    pub network_throughput: Option<u64>,
    pub simulation_length: Option<f64>,
    pub sla_slack: Option<SlaSlackConfig>,
    pub trace: Option<String>,
    pub workload: Option<WorkloadConfig>,
}

/// Represents scheduler configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Placement strategy: `BestFit`, `RoundRobin` or `EnergyPriority`.
    pub placement: String,
    /// Memory reserved for every VM on top of the memory of its tasks.
    pub vm_memory_overhead: u64,
    /// Whether a rebalancing pass runs after every task completion.
    pub rebalance_on_task_complete: bool,
    /// Whether a rebalancing pass also runs on every periodic check.
    pub rebalance_on_periodic_check: bool,
    /// Number of extra consecutive periodic checks a machine must stay empty before it is put to standby.
    /// Zero means the first empty check already powers the machine down.
    pub standby_grace_checks: u32,
    /// Whether tasks that could not be placed are kept and retried when capacity may have been freed.
    pub retry_unplaced: bool,
    /// Whether every machine gets a VM of the default image for its architecture at startup.
    pub init_default_vms: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            placement: "BestFit".to_string(),
            vm_memory_overhead: 1024,
            rebalance_on_task_complete: true,
            rebalance_on_periodic_check: false,
            standby_grace_checks: 0,
            retry_unplaced: false,
            init_default_vms: true,
        }
    }
}

impl SchedulerConfig {
    /// Creates default config with the specified placement strategy.
    pub fn with_placement(placement: &str) -> Self {
        Self {
            placement: placement.to_string(),
            ..Self::default()
        }
    }

    fn from_raw(raw: RawSchedulerConfig) -> Self {
        let default = Self::default();
        Self {
            placement: raw.placement.unwrap_or(default.placement),
            vm_memory_overhead: raw.vm_memory_overhead.unwrap_or(default.vm_memory_overhead),
            rebalance_on_task_complete: raw
                .rebalance_on_task_complete
                .unwrap_or(default.rebalance_on_task_complete),
            rebalance_on_periodic_check: raw
                .rebalance_on_periodic_check
                .unwrap_or(default.rebalance_on_periodic_check),
            standby_grace_checks: raw.standby_grace_checks.unwrap_or(default.standby_grace_checks),
            retry_unplaced: raw.retry_unplaced.unwrap_or(default.retry_unplaced),
            init_default_vms: raw.init_default_vms.unwrap_or(default.init_default_vms),
        }
    }
}

/// Holds configuration of a single physical machine or a set of identical machines.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct MachineConfig {
    /// Machine name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// Machine name prefix.
    /// Full name is produced by appending machine instance number to the prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// CPU architecture.
    pub cpu: CpuArch,
    /// Memory capacity in MB.
    pub memory: u64,
    /// Number of such machines.
    pub count: Option<u32>,
    /// Power draw in W of an active machine without load.
    pub idle_power: Option<f64>,
    /// Power draw in W of a fully loaded machine.
    pub max_power: Option<f64>,
    /// Power draw in W of a machine in standby.
    pub standby_power: Option<f64>,
}

impl MachineConfig {
    /// Returns names of all machines described by this entry.
    pub fn names(&self) -> Vec<String> {
        let count = self.count.unwrap_or(1);
        if count == 1 {
            if let Some(name) = &self.name {
                return vec![name.clone()];
            }
        }
        let prefix = self.name_prefix.clone().or(self.name.clone()).unwrap_or("m".to_string());
        (0..count).map(|i| format!("{}{}", prefix, i)).collect()
    }
}

/// Deadline multipliers: a task meets its SLA if it finishes within `duration * slack` after arrival.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SlaSlackConfig {
    pub sla0: f64,
    pub sla1: f64,
    pub sla2: f64,
}

impl Default for SlaSlackConfig {
    fn default() -> Self {
        Self {
            sla0: 1.2,
            sla1: 1.5,
            sla2: 2.0,
        }
    }
}

impl SlaSlackConfig {
    /// Returns the slack of the class or `None` for best-effort tasks.
    pub fn slack(&self, sla: SlaClass) -> Option<f64> {
        match sla {
            SlaClass::Sla0 => Some(self.sla0),
            SlaClass::Sla1 => Some(self.sla1),
            SlaClass::Sla2 => Some(self.sla2),
            SlaClass::Sla3 => None,
        }
    }
}

/// Parameters of a randomly generated workload.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct WorkloadConfig {
    pub seed: u64,
    pub task_count: u32,
    /// Mean time between consecutive task arrivals.
    pub mean_interarrival: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub min_memory: u64,
    pub max_memory: u64,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Configurations of physical machines.
    pub machines: Vec<MachineConfig>,
    /// Period in seconds between periodic checks.
    pub periodic_check_interval: f64,
    /// Network throughput in MB/s, used to compute VM migration duration.
    pub network_throughput: u64,
    /// Length of simulation in seconds, zero means run until all work is done.
    pub simulation_length: f64,
    /// SLA deadline multipliers.
    pub sla_slack: SlaSlackConfig,
    /// Path to CSV task trace.
    pub trace: Option<String>,
    /// Generated workload, used if no trace is set.
    pub workload: Option<WorkloadConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            machines: Vec::new(),
            periodic_check_interval: 1.,
            network_throughput: 1000,
            simulation_length: 0.,
            sla_slack: SlaSlackConfig::default(),
            trace: None,
            workload: None,
        }
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        // trace paths are relative to the config file
        if let (Some(trace), Some(dir)) = (&config.trace, path.parent()) {
            if Path::new(trace).is_relative() {
                config.trace = Some(dir.join(trace).to_string_lossy().into_owned());
            }
        }
        Ok(config)
    }

    /// Creates simulation config from YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(content)?;
        let default = Self::default();
        let config = Self {
            scheduler: SchedulerConfig::from_raw(raw.scheduler.unwrap_or_default()),
            machines: raw.machines.unwrap_or_default(),
            periodic_check_interval: raw.periodic_check_interval.unwrap_or(default.periodic_check_interval),
            network_throughput: raw.network_throughput.unwrap_or(default.network_throughput),
            simulation_length: raw.simulation_length.unwrap_or(default.simulation_length),
            sla_slack: raw.sla_slack.unwrap_or_default(),
            trace: raw.trace,
            workload: raw.workload,
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns total machines count.
    pub fn number_of_machines(&self) -> u32 {
        self.machines.iter().map(|m| m.count.unwrap_or(1)).sum()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.number_of_machines() == 0 {
            return Err(ConfigError::Invalid("no machines configured".to_string()));
        }
        if self.periodic_check_interval <= 0. {
            return Err(ConfigError::Invalid(format!(
                "periodic_check_interval must be positive, got {}",
                self.periodic_check_interval
            )));
        }
        if self.network_throughput == 0 {
            return Err(ConfigError::Invalid("network_throughput must be positive".to_string()));
        }
        if let Some(workload) = &self.workload {
            if workload.min_duration > workload.max_duration || workload.min_memory > workload.max_memory {
                return Err(ConfigError::Invalid("workload ranges are empty".to_string()));
            }
        }
        Ok(())
    }
}
