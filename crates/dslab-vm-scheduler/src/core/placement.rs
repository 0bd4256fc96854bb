//! Task placement.

use simcore::{log_debug, log_error};
use simcore::SimulationContext;

use crate::core::cluster_api::{ClusterApi, ClusterError, MachineInfo, TaskInfo};
use crate::core::cluster_state::ClusterState;
use crate::core::common::{AdmissionVerdict, MachineId, TaskId, VmId};
use crate::core::config::{parse_config_value, parse_options, ConfigError};
use crate::core::placement_strategies::best_fit::BestFitExisting;
use crate::core::placement_strategies::energy_priority::EnergyPriority;
use crate::core::placement_strategies::round_robin::RoundRobin;
use crate::core::power_manager::PowerManager;

/// Decision produced by a placement strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementDecision {
    /// Add the task to an existing VM hosted by the machine.
    Existing { vm: VmId, machine: MachineId },
    /// Create a VM of the required type on the machine and add the task to it.
    NewVm { machine: MachineId },
}

impl PlacementDecision {
    pub fn machine(&self) -> MachineId {
        match self {
            PlacementDecision::Existing { machine, .. } => *machine,
            PlacementDecision::NewVm { machine } => *machine,
        }
    }
}

/// Result of placing a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementOutcome {
    Placed {
        vm: VmId,
        machine: MachineId,
        /// The VM was created for this task.
        new_vm: bool,
        /// The machine was woken up from standby for this task.
        activated: bool,
    },
    Unplaceable,
}

/// Trait for implementation of task placement strategies.
///
/// A strategy looks only at Active machines. It must never return a VM that is in the migrating set
/// and must only return machines that pass [`check_admission`] for the task.
/// Waking up standby machines is done by [`PlacementEngine`] when the strategy finds nothing.
pub trait PlacementStrategy {
    /// Returns strategy name used in logs and reports.
    fn name(&self) -> &str;

    fn select(
        &mut self,
        task: &TaskInfo,
        vm_memory_overhead: u64,
        state: &mut ClusterState,
        cluster: &dyn ClusterApi,
    ) -> Option<PlacementDecision>;
}

/// Creates placement strategy from its config string.
pub fn placement_strategy_resolver(config_str: &str) -> Result<Box<dyn PlacementStrategy>, ConfigError> {
    let (strategy_name, options) = parse_config_value(config_str);
    let options = options.map(|s| parse_options(&s)).unwrap_or_default();
    match strategy_name.as_str() {
        "BestFit" | "BestFitExisting" => Ok(Box::new(BestFitExisting::new())),
        "RoundRobin" => match options.get("start") {
            Some(start) => {
                let position = start
                    .parse::<usize>()
                    .map_err(|_| ConfigError::Invalid(format!("invalid RoundRobin start position: {}", start)))?;
                Ok(Box::new(RoundRobin::starting_at(position)))
            }
            None => Ok(Box::new(RoundRobin::new())),
        },
        "EnergyPriority" | "PriorityQueueEnergy" => Ok(Box::new(EnergyPriority::new())),
        _ => Err(ConfigError::Invalid(format!("unknown placement strategy: {}", config_str))),
    }
}

/// Checks whether the task with its VM overhead fits on the machine.
pub fn check_admission(machine: &MachineInfo, task: &TaskInfo, vm_memory_overhead: u64) -> AdmissionVerdict {
    if !machine.is_active() {
        return AdmissionVerdict::MachineNotActive;
    }
    if machine.cpu != task.required_cpu {
        return AdmissionVerdict::ArchMismatch;
    }
    if machine.memory_available() < task.required_memory + vm_memory_overhead {
        return AdmissionVerdict::NotEnoughMemory;
    }
    AdmissionVerdict::Success
}

/// Returns a non-migrating VM of the type required by the task hosted on the machine.
pub fn find_reusable_vm(
    machine: MachineId,
    task: &TaskInfo,
    state: &ClusterState,
    cluster: &dyn ClusterApi,
) -> Option<VmId> {
    state
        .vms_on(machine)
        .iter()
        .copied()
        .filter(|&vm| !state.is_migrating(vm) && state.host_of(vm) == Some(machine))
        .find(|&vm| cluster.vm_info(vm).vm_type == task.required_vm)
}

/// Maps arriving tasks to VMs using the configured strategy.
///
/// If the strategy finds no Active machine, the engine falls back to waking up a Standby machine
/// of the required architecture and creating a fresh VM there.
pub struct PlacementEngine {
    strategy: Box<dyn PlacementStrategy>,
    vm_memory_overhead: u64,
    ctx: SimulationContext,
}

impl PlacementEngine {
    pub fn new(strategy: Box<dyn PlacementStrategy>, vm_memory_overhead: u64, ctx: SimulationContext) -> Self {
        Self {
            strategy,
            vm_memory_overhead,
            ctx,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn place(
        &mut self,
        task_id: TaskId,
        state: &mut ClusterState,
        cluster: &mut dyn ClusterApi,
        power_manager: &mut PowerManager,
    ) -> PlacementOutcome {
        let task = cluster.task_info(task_id);

        if let Some(decision) = self
            .strategy
            .select(&task, self.vm_memory_overhead, state, &*cluster)
        {
            log_debug!(
                self.ctx,
                "{} selected machine {} for task {}",
                self.strategy.name(),
                decision.machine(),
                task.id
            );
            if let Some(outcome) = self.apply(decision, &task, state, cluster, false) {
                return outcome;
            }
        }

        let standby = power_manager.find_standby_machine(&task, self.vm_memory_overhead, state, &*cluster);
        if let Some(machine) = standby {
            if let Err(e) = power_manager.activate(machine, cluster) {
                log_error!(self.ctx, "failed to wake up machine {}: {}", machine, e);
                return PlacementOutcome::Unplaceable;
            }
            log_debug!(self.ctx, "woke up machine {} for task {}", machine, task.id);
            if let Some(outcome) = self.apply(PlacementDecision::NewVm { machine }, &task, state, cluster, true) {
                return outcome;
            }
        }

        PlacementOutcome::Unplaceable
    }

    fn apply(
        &self,
        decision: PlacementDecision,
        task: &TaskInfo,
        state: &mut ClusterState,
        cluster: &mut dyn ClusterApi,
        activated: bool,
    ) -> Option<PlacementOutcome> {
        let result = match decision {
            PlacementDecision::Existing { vm, machine } => self.add_task(vm, task, state, cluster).map(|_| {
                PlacementOutcome::Placed {
                    vm,
                    machine,
                    new_vm: false,
                    activated,
                }
            }),
            PlacementDecision::NewVm { machine } => {
                self.create_vm_with_task(machine, task, state, cluster)
                    .map(|vm| PlacementOutcome::Placed {
                        vm,
                        machine,
                        new_vm: true,
                        activated,
                    })
            }
        };
        match result {
            Ok(outcome) => {
                // the machine load changed, its queue key must follow
                let machine = decision.machine();
                let power = cluster.machine_info(machine).power;
                state.energy_queue_mut().update(machine, power);
                Some(outcome)
            }
            Err(e) => {
                log_error!(self.ctx, "failed to place task {} on machine {}: {}", task.id, decision.machine(), e);
                None
            }
        }
    }

    fn create_vm_with_task(
        &self,
        machine: MachineId,
        task: &TaskInfo,
        state: &mut ClusterState,
        cluster: &mut dyn ClusterApi,
    ) -> Result<VmId, ClusterError> {
        let vm = cluster.create_vm(task.required_vm, task.required_cpu);
        if let Err(e) = cluster.attach_vm(vm, machine) {
            if let Err(e) = cluster.shutdown_vm(vm) {
                log_error!(self.ctx, "failed to shut down unattached vm {}: {}", vm, e);
            }
            return Err(e);
        }
        state.register_vm(vm);
        state.attach_vm(vm, machine);
        log_debug!(self.ctx, "created vm {} ({}) on machine {}", vm, task.required_vm, machine);
        self.add_task(vm, task, state, cluster)?;
        Ok(vm)
    }

    fn add_task(
        &self,
        vm: VmId,
        task: &TaskInfo,
        state: &mut ClusterState,
        cluster: &mut dyn ClusterApi,
    ) -> Result<(), ClusterError> {
        cluster.add_task(vm, task.id, task.priority)?;
        state.assign_task(task.id, vm);
        log_debug!(self.ctx, "assigned task {} to vm {}", task.id, vm);
        Ok(())
    }
}
