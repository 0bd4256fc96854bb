//! Cluster state model.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::core::common::{MachineId, TaskId, VmId};
use crate::core::energy_queue::EnergyQueue;

/// Migration issued by the scheduler and not yet reported as complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingMigration {
    pub from: MachineId,
    pub to: MachineId,
}

/// Scheduler's own view of the cluster: which machines and VMs are known and how they are related.
///
/// Capacity and usage numbers are not stored here, they are queried from the cluster collaborator.
/// Attachment sets include provisional attachments of VMs that are being migrated.
///
/// Machines and VMs are never removed from the roster during a run.
#[derive(Clone, Default)]
pub struct ClusterState {
    machines: Vec<MachineId>,
    vms: Vec<VmId>,
    machine_vms: BTreeMap<MachineId, Vec<VmId>>,
    vm_host: BTreeMap<VmId, MachineId>,
    migrating: BTreeMap<VmId, PendingMigration>,
    task_vm: HashMap<TaskId, VmId>,
    unplaced: VecDeque<TaskId>,
    energy_queue: EnergyQueue,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds machine to the roster.
    pub fn register_machine(&mut self, machine: MachineId, power: f64) {
        if self.machine_vms.contains_key(&machine) {
            return;
        }
        self.machines.push(machine);
        self.machine_vms.insert(machine, Vec::new());
        self.energy_queue.push(machine, power);
    }

    /// Adds VM to the roster. The VM stays unattached until [`attach_vm`](Self::attach_vm) is called.
    pub fn register_vm(&mut self, vm: VmId) {
        if !self.vms.contains(&vm) {
            self.vms.push(vm);
        }
    }

    /// Records that the VM is hosted by the machine.
    pub fn attach_vm(&mut self, vm: VmId, machine: MachineId) {
        self.register_vm(vm);
        if let Some(previous) = self.vm_host.insert(vm, machine) {
            self.detach(vm, previous);
        }
        let attached = self.machine_vms.entry(machine).or_default();
        if !attached.contains(&vm) {
            attached.push(vm);
        }
    }

    /// Moves the VM between attachment sets. The host mapping is not changed.
    pub fn relocate(&mut self, vm: VmId, from: MachineId, to: MachineId) {
        self.detach(vm, from);
        let attached = self.machine_vms.entry(to).or_default();
        if !attached.contains(&vm) {
            attached.push(vm);
        }
    }

    /// Marks the VM as being migrated to the machine.
    ///
    /// Returns false if the VM is not attached or a migration of this VM is already in flight.
    pub fn mark_migrating(&mut self, vm: VmId, to: MachineId) -> bool {
        if self.migrating.contains_key(&vm) {
            return false;
        }
        match self.vm_host.get(&vm) {
            Some(&from) => {
                self.migrating.insert(vm, PendingMigration { from, to });
                true
            }
            None => false,
        }
    }

    /// Removes the VM from the migrating set and returns the migration it was part of.
    pub fn clear_migrating(&mut self, vm: VmId) -> Option<PendingMigration> {
        self.migrating.remove(&vm)
    }

    /// Finishes the in-flight migration of the VM: its host becomes the recorded destination.
    pub fn complete_migration(&mut self, vm: VmId) -> Option<PendingMigration> {
        let migration = self.clear_migrating(vm)?;
        self.vm_host.insert(vm, migration.to);
        Some(migration)
    }

    /// Reverts a migration that was marked but could not be started.
    pub fn abort_migration(&mut self, vm: VmId) -> Option<PendingMigration> {
        let migration = self.clear_migrating(vm)?;
        self.relocate(vm, migration.to, migration.from);
        Some(migration)
    }

    pub fn is_migrating(&self, vm: VmId) -> bool {
        self.migrating.contains_key(&vm)
    }

    pub fn pending_migration(&self, vm: VmId) -> Option<PendingMigration> {
        self.migrating.get(&vm).copied()
    }

    /// Returns VMs with a migration in flight, ordered by ID.
    pub fn migrating_vms(&self) -> Vec<VmId> {
        self.migrating.keys().copied().collect()
    }

    pub fn migrating_count(&self) -> usize {
        self.migrating.len()
    }

    /// Returns all known machines in registration order.
    pub fn machines(&self) -> &[MachineId] {
        &self.machines
    }

    /// Returns all known VMs in creation order.
    pub fn vms(&self) -> &[VmId] {
        &self.vms
    }

    /// Returns VMs attached (or provisionally attached) to the machine.
    pub fn vms_on(&self, machine: MachineId) -> &[VmId] {
        self.machine_vms.get(&machine).map(|vms| vms.as_slice()).unwrap_or(&[])
    }

    /// Returns the host machine of the VM as known by the scheduler.
    pub fn host_of(&self, vm: VmId) -> Option<MachineId> {
        self.vm_host.get(&vm).copied()
    }

    /// Records the assignment of task to VM.
    pub fn assign_task(&mut self, task: TaskId, vm: VmId) {
        self.task_vm.insert(task, vm);
    }

    /// Forgets the finished task and returns the VM it was assigned to.
    pub fn release_task(&mut self, task: TaskId) -> Option<VmId> {
        self.task_vm.remove(&task)
    }

    pub fn vm_of_task(&self, task: TaskId) -> Option<VmId> {
        self.task_vm.get(&task).copied()
    }

    /// Appends the task to the backlog of tasks waiting for placement.
    pub fn push_unplaced(&mut self, task: TaskId) {
        self.unplaced.push_back(task);
    }

    /// Takes all tasks from the backlog, oldest first.
    pub fn take_unplaced(&mut self) -> Vec<TaskId> {
        self.unplaced.drain(..).collect()
    }

    pub fn unplaced_count(&self) -> usize {
        self.unplaced.len()
    }

    pub fn energy_queue(&self) -> &EnergyQueue {
        &self.energy_queue
    }

    pub fn energy_queue_mut(&mut self) -> &mut EnergyQueue {
        &mut self.energy_queue
    }

    fn detach(&mut self, vm: VmId, machine: MachineId) {
        if let Some(attached) = self.machine_vms.get_mut(&machine) {
            attached.retain(|&id| id != vm);
        }
    }
}
