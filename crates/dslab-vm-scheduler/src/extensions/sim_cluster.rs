//! In-memory cluster of machines implementing [`ClusterApi`].

use std::collections::{BTreeMap, BTreeSet};

use simcore::cast;
use simcore::log_debug;
use simcore::{Event, EventHandler, Id, SimulationContext};

use crate::core::cluster_api::{ClusterApi, ClusterError, MachineInfo, TaskInfo, VmInfo};
use crate::core::common::{CpuArch, MachineId, PowerState, Priority, SlaClass, TaskId, VmId, VmType};
use crate::core::config::SlaSlackConfig;
use crate::core::events::cluster::{MigrationFinished, PeriodicTick, PlacementDeadline, TaskArrived, TaskFinished};
use crate::core::events::scheduler::{
    MemoryWarning, MigrationCompleted, NewTask, PeriodicCheck, SlaWarning, StateChangeCompleted, TaskCompleted,
};
use crate::extensions::energy_meter::EnergyMeter;
use crate::extensions::power_model::PowerModel;
use crate::extensions::workload::TaskSpec;

/// Machine memory utilization from which memory warnings are reported.
pub const MEMORY_WARNING_THRESHOLD: f64 = 0.95;

struct SimMachine {
    name: String,
    cpu: CpuArch,
    memory_total: u64,
    memory_used: u64,
    state: PowerState,
    // resident VMs and VMs being migrated to this machine
    vms: BTreeSet<VmId>,
    power_model: Box<dyn PowerModel>,
    energy_meter: EnergyMeter,
}

impl SimMachine {
    fn memory_available(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_used)
    }

    fn current_power(&self) -> f64 {
        let utilization = if self.memory_total == 0 {
            0.
        } else {
            self.memory_used as f64 / self.memory_total as f64
        };
        self.power_model.get_power(self.state, utilization)
    }
}

struct SimVm {
    vm_type: VmType,
    cpu: CpuArch,
    machine: Option<MachineId>,
    migration_target: Option<MachineId>,
    tasks: Vec<TaskId>,
    shut_down: bool,
}

struct SimTask {
    spec: TaskSpec,
    priority: Priority,
    vm: Option<VmId>,
    finished_at: Option<f64>,
}

// Scheduler connection and periodic check settings.
struct Notifications {
    scheduler: Id,
    network_throughput: u64,
    check_interval: f64,
    // zero means checking while there is work left
    check_until: f64,
}

#[derive(Clone, Copy, Default)]
struct SlaCounter {
    completed: u32,
    met: u32,
}

/// Cluster with exact memory accounting, power models and SLA tracking.
///
/// Every attached VM reserves the VM overhead on its machine, every task reserves its memory on
/// the machine of its VM. Commands that would overcommit memory are rejected.
/// A migrating VM holds its memory on both the source and the destination until the migration finishes.
///
/// Once connected to a scheduler with [`SimCluster::connect_scheduler`], the cluster also plays the role of the
/// environment: it delivers task arrivals, completes tasks and migrations after their durations, and notifies
/// the scheduler about these and other occurrences via events.
pub struct SimCluster {
    machines: Vec<SimMachine>,
    vms: Vec<SimVm>,
    tasks: BTreeMap<TaskId, SimTask>,
    vm_memory_overhead: u64,
    sla_slack: SlaSlackConfig,
    sla_counters: BTreeMap<SlaClass, SlaCounter>,
    notifications: Option<Notifications>,
    pending_arrivals: usize,
    ctx: SimulationContext,
}

impl SimCluster {
    pub fn new(ctx: SimulationContext, vm_memory_overhead: u64, sla_slack: SlaSlackConfig) -> Self {
        Self {
            machines: Vec::new(),
            vms: Vec::new(),
            tasks: BTreeMap::new(),
            vm_memory_overhead,
            sla_slack,
            sla_counters: BTreeMap::new(),
            notifications: None,
            pending_arrivals: 0,
            ctx,
        }
    }

    /// Returns the ID of cluster component.
    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Makes the cluster report its events to the scheduler and model task and migration durations.
    ///
    /// Migration of a VM takes its memory divided by the network throughput.
    pub fn connect_scheduler(&mut self, scheduler: Id, network_throughput: u64) {
        self.notifications = Some(Notifications {
            scheduler,
            network_throughput: network_throughput.max(1),
            check_interval: 0.,
            check_until: 0.,
        });
    }

    /// Schedules the arrival of the task at its arrival time.
    pub fn schedule_task(&mut self, spec: TaskSpec) {
        let delay = (spec.arrival - self.ctx.time()).max(0.);
        self.pending_arrivals += 1;
        self.ctx.emit_self(TaskArrived { spec }, delay);
    }

    /// Starts sending periodic checks to the connected scheduler.
    ///
    /// With `until` set to zero the checks continue while tasks are pending, running or migrating.
    pub fn start_periodic_checks(&mut self, interval: f64, until: f64) {
        if let Some(notifications) = self.notifications.as_mut() {
            notifications.check_interval = interval;
            notifications.check_until = until;
            self.ctx.emit_self(PeriodicTick {}, interval);
        }
    }

    /// Adds machine in standby state and returns its ID.
    pub fn add_machine(
        &mut self,
        name: &str,
        cpu: CpuArch,
        memory: u64,
        power_model: Box<dyn PowerModel>,
    ) -> MachineId {
        let id = self.machines.len() as MachineId;
        let mut machine = SimMachine {
            name: name.to_string(),
            cpu,
            memory_total: memory,
            memory_used: 0,
            state: PowerState::Standby,
            vms: BTreeSet::new(),
            power_model,
            energy_meter: EnergyMeter::new(),
        };
        let power = machine.current_power();
        machine.energy_meter.update(self.ctx.time(), power);
        self.machines.push(machine);
        id
    }

    pub fn machine_name(&self, machine: MachineId) -> &str {
        &self.machines[machine as usize].name
    }

    /// Registers arrived task. The task priority is derived from its SLA class.
    pub fn submit_task(&mut self, spec: TaskSpec) {
        let priority = spec.sla.priority();
        self.tasks.insert(
            spec.id,
            SimTask {
                spec,
                priority,
                vm: None,
                finished_at: None,
            },
        );
    }

    pub fn task_spec(&self, task: TaskId) -> &TaskSpec {
        &self.tasks[&task].spec
    }

    /// Returns the VM running the task, if it was placed.
    pub fn task_vm(&self, task: TaskId) -> Option<VmId> {
        self.tasks[&task].vm
    }

    /// Completes the running task: frees its memory and records whether its SLA was met.
    ///
    /// Returns false if the task is not running.
    pub fn finish_task(&mut self, task_id: TaskId) -> bool {
        let time = self.ctx.time();
        let task = match self.tasks.get_mut(&task_id) {
            Some(task) => task,
            None => return false,
        };
        let vm_id = match task.vm {
            Some(vm) if task.finished_at.is_none() => vm,
            _ => return false,
        };
        task.finished_at = Some(time);
        let memory = task.spec.memory;
        let met = match self.sla_slack.slack(task.spec.sla) {
            Some(slack) => time <= task.spec.arrival + task.spec.duration * slack,
            None => true,
        };
        let counter = self.sla_counters.entry(task.spec.sla).or_default();
        counter.completed += 1;
        if met {
            counter.met += 1;
        }

        let vm = &mut self.vms[vm_id as usize];
        if vm.shut_down {
            return true;
        }
        vm.tasks.retain(|&t| t != task_id);
        let hosts: Vec<MachineId> = vm.machine.iter().chain(vm.migration_target.iter()).copied().collect();
        for machine in hosts {
            self.release_memory(machine, memory);
        }
        true
    }

    /// Returns memory occupied by the VM: overhead plus memory of its tasks.
    pub fn vm_memory(&self, vm: VmId) -> u64 {
        self.vm_memory_overhead
            + self.vms[vm as usize]
                .tasks
                .iter()
                .map(|t| self.tasks[t].spec.memory)
                .sum::<u64>()
    }

    /// Finishes the migration of the VM and returns its new host.
    pub fn finish_migration(&mut self, vm_id: VmId) -> Option<MachineId> {
        let memory = self.vm_memory(vm_id);
        let vm = &mut self.vms[vm_id as usize];
        let target = vm.migration_target.take()?;
        let source = vm.machine.replace(target);
        if let Some(source) = source {
            self.machines[source as usize].vms.remove(&vm_id);
            self.release_memory(source, memory);
        }
        Some(target)
    }

    /// Returns the VM that is migrating, if any, to its destination.
    pub fn migration_target(&self, vm: VmId) -> Option<MachineId> {
        self.vms[vm as usize].migration_target
    }

    /// Returns the number of tasks that are placed and not finished.
    pub fn running_task_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.vm.is_some() && t.finished_at.is_none())
            .count()
    }

    /// Returns the number of completed tasks of the class and how many of them met their SLA.
    pub fn sla_counts(&self, sla: SlaClass) -> (u32, u32) {
        let counter = self.sla_counters.get(&sla).copied().unwrap_or_default();
        (counter.completed, counter.met)
    }

    /// Returns the number of tasks that were never placed.
    pub fn unplaced_task_count(&self) -> usize {
        self.tasks.values().filter(|t| t.vm.is_none()).count()
    }

    fn migrating_vm_count(&self) -> usize {
        self.vms.iter().filter(|vm| vm.migration_target.is_some()).count()
    }

    fn notify<T: simcore::EventData>(&self, data: T) {
        if let Some(notifications) = &self.notifications {
            self.ctx.emit_now(data, notifications.scheduler);
        }
    }

    fn on_task_arrived(&mut self, spec: TaskSpec) {
        let task = spec.id;
        self.pending_arrivals = self.pending_arrivals.saturating_sub(1);
        self.submit_task(spec);
        self.notify(NewTask { task });
        // delivered after the scheduler has handled the arrival
        self.ctx.emit_self_now(PlacementDeadline { task });
    }

    fn on_placement_deadline(&mut self, task: TaskId) {
        let t = &self.tasks[&task];
        if t.vm.is_none() && t.spec.sla != SlaClass::Sla3 {
            self.notify(SlaWarning { task });
        }
    }

    fn on_task_finished(&mut self, task: TaskId) {
        if self.finish_task(task) {
            log_debug!(self.ctx, "task {} finished", task);
            self.notify(TaskCompleted { task });
        }
    }

    fn on_migration_finished(&mut self, vm: VmId) {
        if let Some(target) = self.finish_migration(vm) {
            log_debug!(self.ctx, "vm {} arrived at machine {}", vm, target);
            self.notify(MigrationCompleted { vm });
        }
    }

    fn on_periodic_tick(&mut self) {
        let (interval, until) = match &self.notifications {
            Some(notifications) => (notifications.check_interval, notifications.check_until),
            None => return,
        };
        self.notify(PeriodicCheck {});
        let next = self.ctx.time() + interval;
        let keep_going = if until > 0. {
            next <= until
        } else {
            self.pending_arrivals > 0 || self.running_task_count() > 0 || self.migrating_vm_count() > 0
        };
        if keep_going {
            self.ctx.emit_self(PeriodicTick {}, interval);
        }
    }

    fn reserve_memory(&mut self, machine: MachineId, memory: u64) {
        self.machines[machine as usize].memory_used += memory;
        self.refresh_power(machine);
    }

    fn release_memory(&mut self, machine: MachineId, memory: u64) {
        let m = &mut self.machines[machine as usize];
        m.memory_used = m.memory_used.saturating_sub(memory);
        self.refresh_power(machine);
    }

    fn refresh_power(&mut self, machine: MachineId) {
        let time = self.ctx.time();
        let m = &mut self.machines[machine as usize];
        let power = m.current_power();
        m.energy_meter.update(time, power);
    }

    fn check_memory(&self, machine: MachineId, requested: u64) -> Result<(), ClusterError> {
        let available = self.machines[machine as usize].memory_available();
        if available < requested {
            return Err(ClusterError::NotEnoughMemory {
                machine,
                requested,
                available,
            });
        }
        Ok(())
    }

    fn check_host(&self, vm: VmId, machine: MachineId) -> Result<(), ClusterError> {
        let m = &self.machines[machine as usize];
        if m.state != PowerState::Active {
            return Err(ClusterError::MachineNotActive(machine));
        }
        let vm_cpu = self.vms[vm as usize].cpu;
        if vm_cpu != m.cpu {
            return Err(ClusterError::ArchMismatch {
                vm,
                vm_cpu,
                machine,
                machine_cpu: m.cpu,
            });
        }
        Ok(())
    }

    fn running_tasks_on(&self, machine: MachineId) -> u32 {
        self.machines[machine as usize]
            .vms
            .iter()
            .map(|&vm| &self.vms[vm as usize])
            .filter(|vm| vm.machine == Some(machine))
            .map(|vm| vm.tasks.len() as u32)
            .sum()
    }
}

impl ClusterApi for SimCluster {
    fn machine_count(&self) -> u32 {
        self.machines.len() as u32
    }

    fn machine_info(&self, machine: MachineId) -> MachineInfo {
        let m = &self.machines[machine as usize];
        MachineInfo {
            id: machine,
            cpu: m.cpu,
            memory_total: m.memory_total,
            memory_used: m.memory_used,
            state: m.state,
            active_vms: m.vms.len() as u32,
            active_tasks: self.running_tasks_on(machine),
            power: m.current_power(),
            energy_consumed: m.energy_meter.energy_consumed_at(self.ctx.time()),
        }
    }

    fn vm_info(&self, vm: VmId) -> VmInfo {
        let v = &self.vms[vm as usize];
        VmInfo {
            id: vm,
            vm_type: v.vm_type,
            cpu: v.cpu,
            machine: v.machine,
            active_tasks: v.tasks.clone(),
        }
    }

    fn task_info(&self, task: TaskId) -> TaskInfo {
        let t = &self.tasks[&task];
        TaskInfo {
            id: task,
            required_cpu: t.spec.cpu,
            required_vm: t.spec.vm_type,
            required_memory: t.spec.memory,
            required_sla: t.spec.sla,
            priority: t.priority,
        }
    }

    fn cluster_energy(&self) -> f64 {
        let time = self.ctx.time();
        self.machines
            .iter()
            .map(|m| m.energy_meter.energy_consumed_at(time))
            .sum()
    }

    fn sla_report(&self, sla: SlaClass) -> f64 {
        let (completed, met) = self.sla_counts(sla);
        if completed == 0 {
            return 100.;
        }
        met as f64 * 100. / completed as f64
    }

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuArch) -> VmId {
        let id = self.vms.len() as VmId;
        self.vms.push(SimVm {
            vm_type,
            cpu,
            machine: None,
            migration_target: None,
            tasks: Vec::new(),
            shut_down: false,
        });
        id
    }

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<(), ClusterError> {
        if self.vms[vm as usize].shut_down {
            return Err(ClusterError::VmShutDown(vm));
        }
        self.check_host(vm, machine)?;
        self.check_memory(machine, self.vm_memory_overhead)?;
        self.vms[vm as usize].machine = Some(machine);
        self.machines[machine as usize].vms.insert(vm);
        self.reserve_memory(machine, self.vm_memory_overhead);
        Ok(())
    }

    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<(), ClusterError> {
        let v = &self.vms[vm as usize];
        if v.shut_down {
            return Err(ClusterError::VmShutDown(vm));
        }
        if v.migration_target.is_some() {
            return Err(ClusterError::VmMigrating(vm));
        }
        let machine = v.machine.ok_or(ClusterError::VmNotAttached(vm))?;
        let spec = &self.tasks[&task].spec;
        if spec.vm_type != v.vm_type {
            return Err(ClusterError::VmTypeMismatch {
                vm,
                vm_type: v.vm_type,
                task,
                required: spec.vm_type,
            });
        }
        let memory = spec.memory;
        self.check_host(vm, machine)?;
        self.check_memory(machine, memory)?;

        self.vms[vm as usize].tasks.push(task);
        let mut duration = 0.;
        if let Some(t) = self.tasks.get_mut(&task) {
            t.vm = Some(vm);
            t.priority = priority;
            duration = t.spec.duration;
        }
        self.reserve_memory(machine, memory);

        if self.notifications.is_some() {
            self.ctx.emit_self(TaskFinished { task }, duration);
            let m = &self.machines[machine as usize];
            if m.memory_total > 0 && m.memory_used as f64 >= m.memory_total as f64 * MEMORY_WARNING_THRESHOLD {
                self.notify(MemoryWarning { machine });
            }
        }
        Ok(())
    }

    fn shutdown_vm(&mut self, vm_id: VmId) -> Result<(), ClusterError> {
        if self.vms[vm_id as usize].shut_down {
            return Err(ClusterError::VmShutDown(vm_id));
        }
        let memory = self.vm_memory(vm_id);
        let vm = &mut self.vms[vm_id as usize];
        vm.shut_down = true;
        let hosts: Vec<MachineId> = vm.machine.iter().chain(vm.migration_target.iter()).copied().collect();
        vm.migration_target = None;
        for machine in hosts {
            self.machines[machine as usize].vms.remove(&vm_id);
            self.release_memory(machine, memory);
        }
        Ok(())
    }

    fn set_machine_state(&mut self, machine: MachineId, state: PowerState) -> Result<(), ClusterError> {
        let m = &mut self.machines[machine as usize];
        if state == PowerState::Standby && !m.vms.is_empty() {
            return Err(ClusterError::MachineNotEmpty(machine));
        }
        let changed = m.state != state;
        m.state = state;
        self.refresh_power(machine);
        if changed {
            self.notify(StateChangeCompleted { machine });
        }
        Ok(())
    }

    fn migrate_vm(&mut self, vm: VmId, machine: MachineId) -> Result<(), ClusterError> {
        let v = &self.vms[vm as usize];
        if v.shut_down {
            return Err(ClusterError::VmShutDown(vm));
        }
        if v.migration_target.is_some() {
            return Err(ClusterError::VmMigrating(vm));
        }
        if v.machine.is_none() {
            return Err(ClusterError::VmNotAttached(vm));
        }
        self.check_host(vm, machine)?;
        let memory = self.vm_memory(vm);
        self.check_memory(machine, memory)?;

        self.vms[vm as usize].migration_target = Some(machine);
        self.machines[machine as usize].vms.insert(vm);
        self.reserve_memory(machine, memory);

        if let Some(notifications) = &self.notifications {
            let duration = memory as f64 / notifications.network_throughput as f64;
            self.ctx.emit_self(MigrationFinished { vm }, duration);
        }
        Ok(())
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) {
        if let Some(t) = self.tasks.get_mut(&task) {
            t.priority = priority;
        }
    }
}

impl EventHandler for SimCluster {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            TaskArrived { spec } => {
                self.on_task_arrived(spec);
            }
            PlacementDeadline { task } => {
                self.on_placement_deadline(task);
            }
            TaskFinished { task } => {
                self.on_task_finished(task);
            }
            MigrationFinished { vm } => {
                self.on_migration_finished(vm);
            }
            PeriodicTick {} => {
                self.on_periodic_tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use simcore::Simulation;

    use super::*;
    use crate::extensions::power_model::LinearPowerModel;

    fn task(id: TaskId, memory: u64) -> TaskSpec {
        TaskSpec {
            id,
            arrival: 0.,
            duration: 10.,
            cpu: CpuArch::X86,
            vm_type: VmType::Linux,
            memory,
            sla: SlaClass::Sla0,
        }
    }

    fn cluster(machines: u32) -> SimCluster {
        let mut sim = Simulation::new(123);
        let mut cluster = SimCluster::new(sim.create_context("cluster"), 1024, SlaSlackConfig::default());
        for i in 0..machines {
            let id = cluster.add_machine(
                &format!("m{}", i),
                CpuArch::X86,
                16384,
                Box::new(LinearPowerModel::new(100., 200., 10.)),
            );
            cluster.set_machine_state(id, PowerState::Active).unwrap();
        }
        cluster
    }

    #[test]
    fn vm_reserves_overhead_and_task_reserves_memory() {
        let mut cluster = cluster(1);
        cluster.submit_task(task(0, 4096));
        let vm = cluster.create_vm(VmType::Linux, CpuArch::X86);
        cluster.attach_vm(vm, 0).unwrap();
        assert_eq!(cluster.machine_info(0).memory_used, 1024);
        cluster.add_task(vm, 0, Priority::High).unwrap();
        assert_eq!(cluster.machine_info(0).memory_used, 5120);
        assert_eq!(cluster.machine_info(0).active_tasks, 1);

        assert!(cluster.finish_task(0));
        assert_eq!(cluster.machine_info(0).memory_used, 1024);
        assert!(!cluster.finish_task(0));
    }

    #[test]
    fn overcommit_is_rejected() {
        let mut cluster = cluster(1);
        cluster.submit_task(task(0, 15361));
        let vm = cluster.create_vm(VmType::Linux, CpuArch::X86);
        cluster.attach_vm(vm, 0).unwrap();
        assert_eq!(
            cluster.add_task(vm, 0, Priority::High),
            Err(ClusterError::NotEnoughMemory {
                machine: 0,
                requested: 15361,
                available: 15360,
            })
        );
    }

    #[test]
    fn wrong_architecture_is_rejected() {
        let mut cluster = cluster(1);
        let vm = cluster.create_vm(VmType::Aix, CpuArch::Power);
        assert!(matches!(cluster.attach_vm(vm, 0), Err(ClusterError::ArchMismatch { .. })));
    }

    #[test]
    fn migration_holds_memory_on_both_machines() {
        let mut cluster = cluster(2);
        cluster.submit_task(task(0, 2000));
        let vm = cluster.create_vm(VmType::Linux, CpuArch::X86);
        cluster.attach_vm(vm, 0).unwrap();
        cluster.add_task(vm, 0, Priority::High).unwrap();

        cluster.migrate_vm(vm, 1).unwrap();
        assert_eq!(cluster.machine_info(0).memory_used, 3024);
        assert_eq!(cluster.machine_info(1).memory_used, 3024);
        assert_eq!(cluster.migrate_vm(vm, 1), Err(ClusterError::VmMigrating(vm)));

        assert_eq!(cluster.finish_migration(vm), Some(1));
        assert_eq!(cluster.machine_info(0).memory_used, 0);
        assert_eq!(cluster.machine_info(1).memory_used, 3024);
        assert_eq!(cluster.vm_info(vm).machine, Some(1));
        assert_eq!(cluster.machine_info(1).active_tasks, 1);
    }

    #[test]
    fn machine_with_vms_cannot_go_to_standby() {
        let mut cluster = cluster(1);
        let vm = cluster.create_vm(VmType::Linux, CpuArch::X86);
        cluster.attach_vm(vm, 0).unwrap();
        assert_eq!(
            cluster.set_machine_state(0, PowerState::Standby),
            Err(ClusterError::MachineNotEmpty(0))
        );
        cluster.shutdown_vm(vm).unwrap();
        assert!(cluster.set_machine_state(0, PowerState::Standby).is_ok());
        assert_eq!(cluster.machine_info(0).power, 10.);
    }

    #[test]
    fn late_task_violates_sla() {
        let mut sim = Simulation::new(123);
        let mut cluster = SimCluster::new(sim.create_context("cluster"), 0, SlaSlackConfig::default());
        cluster.add_machine("m", CpuArch::X86, 8192, Box::new(LinearPowerModel::default()));
        cluster.set_machine_state(0, PowerState::Active).unwrap();
        let vm = cluster.create_vm(VmType::Linux, CpuArch::X86);
        cluster.attach_vm(vm, 0).unwrap();
        for id in 0..2 {
            cluster.submit_task(task(id, 100));
            cluster.add_task(vm, id, Priority::High).unwrap();
        }
        sim.step_until_time(11.);
        cluster.finish_task(0);
        sim.step_until_time(13.);
        cluster.finish_task(1);
        assert_eq!(cluster.sla_counts(SlaClass::Sla0), (2, 1));
        assert_eq!(cluster.sla_report(SlaClass::Sla0), 50.);
        assert_eq!(cluster.sla_report(SlaClass::Sla3), 100.);
    }
}
