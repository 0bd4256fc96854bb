//! Event lifecycle controller.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use simcore::cast;
use simcore::{log_debug, log_error, log_info, log_trace, log_warn};
use simcore::{Event, EventHandler, Id, Simulation, SimulationContext};

use crate::core::cluster_api::ClusterApi;
use crate::core::cluster_state::ClusterState;
use crate::core::common::{CpuArch, MachineId, PowerState, Priority, SlaClass, TaskId, VmId, VmType};
use crate::core::config::{ConfigError, SchedulerConfig};
use crate::core::events::scheduler::{
    MemoryWarning, MigrationCompleted, NewTask, PeriodicCheck, SlaWarning, StateChangeCompleted, TaskCompleted,
};
use crate::core::placement::{placement_strategy_resolver, PlacementEngine, PlacementOutcome, PlacementStrategy};
use crate::core::power_manager::PowerManager;
use crate::core::rebalancer::{IssuedMigration, Rebalancer};

/// Counters of scheduler decisions.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub tasks_received: u32,
    pub tasks_placed: u32,
    /// Number of placement attempts that found no machine, retries included.
    pub placement_failures: u32,
    pub tasks_completed: u32,
    pub vms_created: u32,
    pub machines_activated: u32,
    pub machines_deactivated: u32,
    pub migrations_issued: u32,
    pub migrations_completed: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    ShutDown,
}

/// Energy-aware scheduler of tasks onto VMs and machines.
///
/// The scheduler is a simulation component: it receives cluster events via [`EventHandler`] and can also
/// be driven by calling its event handlers directly. Every handler runs at the current simulation time,
/// runs to completion and leaves the cluster state consistent.
pub struct Scheduler {
    cluster: Rc<RefCell<dyn ClusterApi>>,
    config: SchedulerConfig,
    state: ClusterState,
    placement: PlacementEngine,
    power_manager: PowerManager,
    rebalancer: Rebalancer,
    stats: SchedulerStats,
    phase: Phase,
    ctx: SimulationContext,
}

impl Scheduler {
    /// Creates scheduler using the placement strategy named in config.
    pub fn new(
        cluster: Rc<RefCell<dyn ClusterApi>>,
        config: SchedulerConfig,
        sim: &mut Simulation,
    ) -> Result<Self, ConfigError> {
        let strategy = placement_strategy_resolver(&config.placement)?;
        Ok(Self::with_strategy(cluster, config, strategy, sim))
    }

    /// Creates scheduler with a custom placement strategy.
    pub fn with_strategy(
        cluster: Rc<RefCell<dyn ClusterApi>>,
        config: SchedulerConfig,
        strategy: Box<dyn PlacementStrategy>,
        sim: &mut Simulation,
    ) -> Self {
        let overhead = config.vm_memory_overhead;
        Self {
            cluster,
            placement: PlacementEngine::new(strategy, overhead, sim.create_context("placement")),
            power_manager: PowerManager::new(config.standby_grace_checks, sim.create_context("power-manager")),
            rebalancer: Rebalancer::new(overhead, sim.create_context("rebalancer")),
            config,
            state: ClusterState::new(),
            stats: SchedulerStats::default(),
            phase: Phase::Created,
            ctx: sim.create_context("scheduler"),
        }
    }

    /// Returns the ID of scheduler component.
    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Registers machines of the cluster, activates them and creates the default VMs.
    pub fn init(&mut self) {
        if self.phase != Phase::Created {
            log_warn!(self.ctx, "scheduler is already initialized");
            return;
        }
        let mut cluster = self.cluster.borrow_mut();
        let machine_count = cluster.machine_count();

        for machine in 0..machine_count {
            let info = cluster.machine_info(machine);
            self.state.register_machine(machine, info.power);
            if info.state != PowerState::Active {
                if let Err(e) = cluster.set_machine_state(machine, PowerState::Active) {
                    log_error!(self.ctx, "failed to activate machine {}: {}", machine, e);
                    continue;
                }
            }
            if !self.config.init_default_vms {
                continue;
            }

            let vm_type = self.default_vm_type(info.cpu);
            if vm_type == VmType::Invalid {
                continue;
            }
            let vm = cluster.create_vm(vm_type, info.cpu);
            match cluster.attach_vm(vm, machine) {
                Ok(()) => {
                    self.state.register_vm(vm);
                    self.state.attach_vm(vm, machine);
                    self.stats.vms_created += 1;
                    log_debug!(self.ctx, "created default vm {} ({}) on machine {}", vm, vm_type, machine);
                }
                Err(e) => {
                    log_error!(self.ctx, "failed to attach default vm {}: {}", vm, e);
                    if let Err(e) = cluster.shutdown_vm(vm) {
                        log_error!(self.ctx, "failed to shut down unattached vm {}: {}", vm, e);
                    }
                }
            }
        }

        // machines were registered with their power before activation
        let machines = self.state.energy_queue_mut().drain_ordered();
        for machine in machines {
            let power = cluster.machine_info(machine).power;
            self.state.energy_queue_mut().push(machine, power);
        }

        self.phase = Phase::Running;
        log_info!(
            self.ctx,
            "initialized {} machines, placement strategy {}",
            machine_count,
            self.placement.strategy_name()
        );
    }

    /// Places the arrived task.
    pub fn on_new_task(&mut self, task: TaskId) -> PlacementOutcome {
        if !self.enter("new task") {
            return PlacementOutcome::Unplaceable;
        }
        log_trace!(self.ctx, "new task {}", task);
        self.stats.tasks_received += 1;

        let outcome = self.place(task);
        if outcome == PlacementOutcome::Unplaceable && self.config.retry_unplaced {
            self.state.push_unplaced(task);
        }
        outcome
    }

    /// Forgets the completed task and tries to consolidate the load.
    pub fn on_task_complete(&mut self, task: TaskId) {
        if !self.enter("task complete") {
            return;
        }
        log_trace!(self.ctx, "task {} completed", task);
        match self.state.release_task(task) {
            Some(vm) => {
                self.stats.tasks_completed += 1;
                log_debug!(self.ctx, "task {} released vm {}", task, vm);
                let mut hosts: Vec<MachineId> = self.state.host_of(vm).into_iter().collect();
                hosts.extend(self.state.pending_migration(vm).map(|migration| migration.to));
                self.refresh_energy_keys(&hosts);
            }
            None => log_warn!(self.ctx, "completed task {} was not placed by scheduler", task),
        }

        self.retry_unplaced();
        if self.config.rebalance_on_task_complete {
            self.rebalance();
        }
    }

    /// Finalizes the migration of the VM to its pending destination.
    pub fn on_migration_complete(&mut self, vm: VmId) {
        if !self.enter("migration complete") {
            return;
        }
        match self.state.complete_migration(vm) {
            Some(migration) => {
                self.stats.migrations_completed += 1;
                self.refresh_energy_keys(&[migration.from, migration.to]);
                log_debug!(
                    self.ctx,
                    "vm {} migrated from machine {} to machine {}",
                    vm,
                    migration.from,
                    migration.to
                );
            }
            None => log_warn!(self.ctx, "vm {} has no migration in progress", vm),
        }
        self.retry_unplaced();
    }

    /// Retries the backlog, optionally rebalances and powers down empty machines.
    pub fn on_periodic_check(&mut self) {
        if !self.enter("periodic check") {
            return;
        }
        log_trace!(self.ctx, "periodic check");
        self.retry_unplaced();
        if self.config.rebalance_on_periodic_check {
            self.rebalance();
        }

        let powered_down = {
            let mut cluster = self.cluster.borrow_mut();
            self.power_manager.on_periodic_check(&self.state, &mut *cluster)
        };
        self.stats.machines_deactivated += powered_down.len() as u32;
        self.refresh_energy_keys(&powered_down);
    }

    /// Shuts down all VMs and reports the run summary. No events are handled afterwards.
    pub fn on_shutdown(&mut self) {
        if !self.enter("shutdown") {
            return;
        }
        {
            let mut cluster = self.cluster.borrow_mut();
            for &vm in self.state.vms() {
                if let Err(e) = cluster.shutdown_vm(vm) {
                    log_error!(self.ctx, "failed to shut down vm {}: {}", vm, e);
                }
            }
        }
        self.phase = Phase::ShutDown;

        let cluster = self.cluster.borrow();
        log_info!(self.ctx, "shut down {} vms", self.state.vms().len());
        log_info!(self.ctx, "cluster energy: {:.3}", cluster.cluster_energy());
        for sla in SlaClass::ALL {
            log_info!(self.ctx, "{} compliance: {:.2}%", sla, cluster.sla_report(sla));
        }
        log_info!(self.ctx, "{:?}", self.stats);
    }

    pub fn on_memory_warning(&mut self, machine: MachineId) {
        if !self.enter("memory warning") {
            return;
        }
        log_warn!(self.ctx, "memory overflow warning on machine {}", machine);
    }

    /// Raises the priority of the task at risk of violating its SLA.
    pub fn on_sla_warning(&mut self, task: TaskId) {
        if !self.enter("SLA warning") {
            return;
        }
        log_warn!(self.ctx, "SLA warning for task {}", task);
        self.cluster.borrow_mut().set_task_priority(task, Priority::High);
    }

    pub fn on_state_change_complete(&mut self, machine: MachineId) {
        if !self.enter("state change complete") {
            return;
        }
        log_trace!(self.ctx, "machine {} completed state change", machine);
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &str {
        self.placement.strategy_name()
    }

    pub fn is_shut_down(&self) -> bool {
        self.phase == Phase::ShutDown
    }

    /// Returns the default VM image for the architecture, or `VmType::Invalid` if there is none.
    pub fn default_vm_type(&self, cpu: CpuArch) -> VmType {
        match cpu {
            CpuArch::X86 => VmType::Linux,
            CpuArch::Arm => VmType::Win,
            CpuArch::Power => VmType::Aix,
            CpuArch::Riscv => {
                log_warn!(self.ctx, "no default vm type for {} machines", cpu);
                VmType::Invalid
            }
        }
    }

    /// Checks that the event can be handled in the current phase.
    fn enter(&self, event: &str) -> bool {
        match self.phase {
            Phase::Running => true,
            Phase::Created => {
                log_warn!(self.ctx, "{} event before initialization is ignored", event);
                false
            }
            Phase::ShutDown => {
                log_warn!(self.ctx, "{} event after shutdown is ignored", event);
                false
            }
        }
    }

    fn place(&mut self, task: TaskId) -> PlacementOutcome {
        let outcome = {
            let mut cluster = self.cluster.borrow_mut();
            self.placement
                .place(task, &mut self.state, &mut *cluster, &mut self.power_manager)
        };
        match outcome {
            PlacementOutcome::Placed {
                vm,
                machine,
                new_vm,
                activated,
            } => {
                self.stats.tasks_placed += 1;
                if new_vm {
                    self.stats.vms_created += 1;
                }
                if activated {
                    self.stats.machines_activated += 1;
                }
                log_debug!(self.ctx, "task {} placed on vm {} (machine {})", task, vm, machine);
            }
            PlacementOutcome::Unplaceable => {
                self.stats.placement_failures += 1;
                log_warn!(self.ctx, "no placement found for task {}", task);
            }
        }
        outcome
    }

    fn retry_unplaced(&mut self) {
        if !self.config.retry_unplaced || self.state.unplaced_count() == 0 {
            return;
        }
        for task in self.state.take_unplaced() {
            if self.place(task) == PlacementOutcome::Unplaceable {
                self.state.push_unplaced(task);
            }
        }
    }

    fn refresh_energy_keys(&mut self, machines: &[MachineId]) {
        let cluster = self.cluster.borrow();
        for &machine in machines {
            let power = cluster.machine_info(machine).power;
            self.state.energy_queue_mut().update(machine, power);
        }
    }

    fn rebalance(&mut self) -> Vec<IssuedMigration> {
        let issued = {
            let mut cluster = self.cluster.borrow_mut();
            self.rebalancer.rebalance(&mut self.state, &mut *cluster)
        };
        self.stats.migrations_issued += issued.len() as u32;
        issued
    }
}

impl EventHandler for Scheduler {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            NewTask { task } => {
                self.on_new_task(task);
            }
            TaskCompleted { task } => {
                self.on_task_complete(task);
            }
            MigrationCompleted { vm } => {
                self.on_migration_complete(vm);
            }
            PeriodicCheck {} => {
                self.on_periodic_check();
            }
            MemoryWarning { machine } => {
                self.on_memory_warning(machine);
            }
            SlaWarning { task } => {
                self.on_sla_warning(task);
            }
            StateChangeCompleted { machine } => {
                self.on_state_change_complete(machine);
            }
        })
    }
}
