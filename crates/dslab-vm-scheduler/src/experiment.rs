//! Comparison of placement strategies on the same cluster and workload.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::info;
use thiserror::Error;
use threadpool::ThreadPool;

use crate::core::config::SimulationConfig;
use crate::simulation::{ClusterSimulation, SimulationError, SimulationReport};

/// Placement strategies compared by default.
pub const ALL_STRATEGIES: [&str; 3] = ["BestFit", "RoundRobin", "EnergyPriority"];

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("run with strategy {strategy} failed: {source}")]
    Run {
        strategy: String,
        #[source]
        source: SimulationError,
    },
    #[error("run with strategy {0} did not finish")]
    Missing(String),
    #[error("can't write results to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't serialize results: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runs the same simulation config once per placement strategy.
pub struct Experiment {
    config: SimulationConfig,
    strategies: Vec<String>,
}

impl Experiment {
    pub fn new(config: SimulationConfig, strategies: Vec<String>) -> Self {
        Self { config, strategies }
    }

    /// Creates experiment comparing all built-in strategies.
    pub fn with_all_strategies(config: SimulationConfig) -> Self {
        Self::new(config, ALL_STRATEGIES.iter().map(|s| s.to_string()).collect())
    }

    /// Runs the experiment using the specified number of threads.
    ///
    /// Results are keyed by strategy in the order the strategies were given.
    pub fn run(&self, num_threads: usize) -> Result<IndexMap<String, SimulationReport>, ExperimentError> {
        let results = Arc::new(Mutex::new(Vec::new()));
        let pool = ThreadPool::new(num_threads.max(1));

        for (run_id, strategy) in self.strategies.iter().enumerate() {
            let mut config = self.config.clone();
            config.scheduler.placement = strategy.clone();
            let results = results.clone();

            pool.execute(move || {
                info!("RUN {}: {}", run_id, config.scheduler.placement);
                let result = ClusterSimulation::new(config).map(|mut sim| sim.run());
                match results.lock() {
                    Ok(mut guard) => guard.push((run_id, result)),
                    Err(poisoned) => poisoned.into_inner().push((run_id, result)),
                }
            });
        }
        pool.join();

        let mut finished = match results.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        finished.sort_by_key(|(run_id, _)| *run_id);

        let mut reports = IndexMap::new();
        let mut finished = finished.into_iter().peekable();
        for (run_id, strategy) in self.strategies.iter().enumerate() {
            match finished.next_if(|(id, _)| *id == run_id) {
                Some((_, Ok(report))) => {
                    reports.insert(strategy.clone(), report);
                }
                Some((_, Err(source))) => {
                    return Err(ExperimentError::Run {
                        strategy: strategy.clone(),
                        source,
                    })
                }
                None => return Err(ExperimentError::Missing(strategy.clone())),
            }
        }
        Ok(reports)
    }
}

/// Writes reports to the file as pretty JSON.
pub fn save_reports<P: AsRef<Path>>(
    path: P,
    reports: &IndexMap<String, SimulationReport>,
) -> Result<(), ExperimentError> {
    let path = path.as_ref();
    let mut file = File::create(path).map_err(|source| ExperimentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(&mut file, reports)?;
    Ok(())
}
