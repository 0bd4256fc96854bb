//! Event-driven simulation of the cluster driven by the scheduler.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use sugars::{rc, refcell};
use thiserror::Error;

use simcore::log_info;
use simcore::{Simulation, SimulationContext};

use crate::core::cluster_api::ClusterApi;
use crate::core::common::{CpuArch, PowerState, SlaClass};
use crate::core::config::{ConfigError, SimulationConfig};
use crate::core::placement::PlacementStrategy;
use crate::core::scheduler::{Scheduler, SchedulerStats};
use crate::extensions::power_model::{
    LinearPowerModel, DEFAULT_IDLE_POWER, DEFAULT_MAX_POWER, DEFAULT_STANDBY_POWER,
};
use crate::extensions::sim_cluster::SimCluster;
use crate::extensions::workload::{generate_workload, read_trace, TaskSpec, TraceError};

/// Seed of the simulation when no workload seed is configured.
const DEFAULT_SEED: u64 = 123;

/// Failure to set up a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Final state of a machine.
#[derive(Clone, Debug, Serialize)]
pub struct MachineReport {
    pub name: String,
    pub cpu: CpuArch,
    pub state: PowerState,
    pub energy_consumed: f64,
}

/// Summary of a simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub strategy: String,
    pub end_time: f64,
    pub total_energy: f64,
    pub tasks_total: u32,
    pub tasks_completed: u32,
    /// Tasks that were never placed.
    pub tasks_unplaced: u32,
    /// Percentage of completed tasks that met their SLA, by class.
    pub sla_compliance: IndexMap<String, f64>,
    pub scheduler: SchedulerStats,
    pub machines: Vec<MachineReport>,
}

/// Simulation of the in-memory cluster under the scheduler.
///
/// Tasks arrive from a trace or a generated workload. Both the cluster and the scheduler are simulation
/// components: the cluster delivers task arrivals, task and migration completions and periodic checks,
/// the scheduler reacts to them by issuing commands to the cluster.
pub struct ClusterSimulation {
    config: SimulationConfig,
    sim: Simulation,
    cluster: Rc<RefCell<SimCluster>>,
    scheduler: Rc<RefCell<Scheduler>>,
    tasks: Vec<TaskSpec>,
    ctx: SimulationContext,
}

impl ClusterSimulation {
    /// Creates simulation from YAML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        Self::new(SimulationConfig::from_file(path)?)
    }

    /// Creates simulation with the workload described in config.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        let tasks = match (&config.trace, &config.workload) {
            (Some(trace), _) => read_trace(trace)?,
            (None, Some(workload)) => generate_workload(workload, &config.machines),
            (None, None) => Vec::new(),
        };
        Ok(Self::with_tasks(config, tasks)?)
    }

    /// Creates simulation with the specified tasks.
    pub fn with_tasks(config: SimulationConfig, tasks: Vec<TaskSpec>) -> Result<Self, ConfigError> {
        let mut sim = Self::create_simulation(&config);
        let cluster = Self::build_cluster(&config, &mut sim);
        let scheduler = Scheduler::new(cluster.clone(), config.scheduler.clone(), &mut sim)?;
        Ok(Self::assemble(config, sim, cluster, scheduler, tasks))
    }

    /// Creates simulation with the specified tasks and a custom placement strategy.
    pub fn with_strategy(config: SimulationConfig, tasks: Vec<TaskSpec>, strategy: Box<dyn PlacementStrategy>) -> Self {
        let mut sim = Self::create_simulation(&config);
        let cluster = Self::build_cluster(&config, &mut sim);
        let scheduler = Scheduler::with_strategy(cluster.clone(), config.scheduler.clone(), strategy, &mut sim);
        Self::assemble(config, sim, cluster, scheduler, tasks)
    }

    fn create_simulation(config: &SimulationConfig) -> Simulation {
        let seed = config.workload.as_ref().map(|w| w.seed).unwrap_or(DEFAULT_SEED);
        Simulation::new(seed)
    }

    fn build_cluster(config: &SimulationConfig, sim: &mut Simulation) -> Rc<RefCell<SimCluster>> {
        let mut cluster = SimCluster::new(
            sim.create_context("cluster"),
            config.scheduler.vm_memory_overhead,
            config.sla_slack.clone(),
        );
        for machine in config.machines.iter() {
            let model = LinearPowerModel::new(
                machine.idle_power.unwrap_or(DEFAULT_IDLE_POWER),
                machine.max_power.unwrap_or(DEFAULT_MAX_POWER),
                machine.standby_power.unwrap_or(DEFAULT_STANDBY_POWER),
            );
            for name in machine.names() {
                cluster.add_machine(&name, machine.cpu, machine.memory, Box::new(model.clone()));
            }
        }
        let cluster = rc!(refcell!(cluster));
        sim.add_handler("cluster", cluster.clone());
        cluster
    }

    fn assemble(
        config: SimulationConfig,
        mut sim: Simulation,
        cluster: Rc<RefCell<SimCluster>>,
        scheduler: Scheduler,
        mut tasks: Vec<TaskSpec>,
    ) -> Self {
        let scheduler = rc!(refcell!(scheduler));
        let scheduler_id = sim.add_handler("scheduler", scheduler.clone());
        cluster
            .borrow_mut()
            .connect_scheduler(scheduler_id, config.network_throughput);
        tasks.sort_by(|a, b| a.arrival.total_cmp(&b.arrival));
        Self {
            ctx: sim.create_context("simulation"),
            config,
            sim,
            cluster,
            scheduler,
            tasks,
        }
    }

    pub fn cluster(&self) -> Rc<RefCell<SimCluster>> {
        self.cluster.clone()
    }

    pub fn scheduler(&self) -> Rc<RefCell<Scheduler>> {
        self.scheduler.clone()
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Runs the simulation until all work is done or the simulation length is reached.
    pub fn run(&mut self) -> SimulationReport {
        log_info!(
            self.ctx,
            "start simulation with {} machines and {} tasks",
            self.cluster.borrow().machine_count(),
            self.tasks.len()
        );
        self.scheduler.borrow_mut().init();
        {
            let mut cluster = self.cluster.borrow_mut();
            for task in self.tasks.iter() {
                cluster.schedule_task(task.clone());
            }
            cluster.start_periodic_checks(self.config.periodic_check_interval, self.config.simulation_length);
        }

        let length = self.config.simulation_length;
        if length > 0. {
            self.sim.step_until_time(length);
        } else {
            self.sim.step_until_no_events();
        }

        let end_time = self.sim.time();
        self.scheduler.borrow_mut().on_shutdown();
        let report = self.report(end_time);
        log_info!(
            self.ctx,
            "simulation finished: energy {:.3}, {} of {} tasks completed",
            report.total_energy,
            report.tasks_completed,
            report.tasks_total
        );
        report
    }

    fn report(&self, end_time: f64) -> SimulationReport {
        let cluster = self.cluster.borrow();
        let scheduler = self.scheduler.borrow();
        let stats = scheduler.stats().clone();
        let mut sla_compliance = IndexMap::new();
        let mut tasks_completed = 0;
        for sla in SlaClass::ALL {
            sla_compliance.insert(sla.to_string(), cluster.sla_report(sla));
            tasks_completed += cluster.sla_counts(sla).0;
        }
        let machines = (0..cluster.machine_count())
            .map(|m| {
                let info = cluster.machine_info(m);
                MachineReport {
                    name: cluster.machine_name(m).to_string(),
                    cpu: info.cpu,
                    state: info.state,
                    energy_consumed: info.energy_consumed,
                }
            })
            .collect();
        SimulationReport {
            strategy: scheduler.strategy_name().to_string(),
            end_time,
            total_energy: cluster.cluster_energy(),
            tasks_total: self.tasks.len() as u32,
            tasks_completed,
            tasks_unplaced: cluster.unplaced_task_count() as u32,
            sla_compliance,
            scheduler: stats,
            machines,
        }
    }
}
