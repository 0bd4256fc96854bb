//! Interface of the cluster collaborator queried and commanded by the scheduler.
//!
//! The collaborator owns the ground truth about capacity, memory usage, energy and SLA statistics.
//! The scheduler never caches these numbers and always asks the collaborator before a decision.

use serde::Serialize;
use thiserror::Error;

use crate::core::common::{CpuArch, MachineId, PowerState, Priority, SlaClass, TaskId, VmId, VmType};

/// Snapshot of a physical machine.
#[derive(Clone, Debug, Serialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub cpu: CpuArch,
    pub memory_total: u64,
    pub memory_used: u64,
    pub state: PowerState,
    pub active_vms: u32,
    pub active_tasks: u32,
    /// Current power draw.
    pub power: f64,
    /// Energy consumed since the start of the run.
    pub energy_consumed: f64,
}

impl MachineInfo {
    pub fn memory_available(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_used)
    }

    pub fn is_active(&self) -> bool {
        self.state == PowerState::Active
    }
}

/// Snapshot of a virtual machine.
#[derive(Clone, Debug, Serialize)]
pub struct VmInfo {
    pub id: VmId,
    pub vm_type: VmType,
    pub cpu: CpuArch,
    /// Host machine, `None` until the VM is attached.
    pub machine: Option<MachineId>,
    pub active_tasks: Vec<TaskId>,
}

/// Snapshot of a task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub required_cpu: CpuArch,
    pub required_vm: VmType,
    pub required_memory: u64,
    pub required_sla: SlaClass,
    pub priority: Priority,
}

/// Rejection of a command by the collaborator.
#[derive(Debug, Error, PartialEq)]
pub enum ClusterError {
    #[error("machine {0} is not active")]
    MachineNotActive(MachineId),
    #[error("machine {0} still hosts vms")]
    MachineNotEmpty(MachineId),
    #[error("not enough memory on machine {machine}: requested {requested}, available {available}")]
    NotEnoughMemory {
        machine: MachineId,
        requested: u64,
        available: u64,
    },
    #[error("vm {vm} ({vm_cpu}) cannot run on machine {machine} ({machine_cpu})")]
    ArchMismatch {
        vm: VmId,
        vm_cpu: CpuArch,
        machine: MachineId,
        machine_cpu: CpuArch,
    },
    #[error("vm {0} is not attached to any machine")]
    VmNotAttached(VmId),
    #[error("vm {0} is already migrating")]
    VmMigrating(VmId),
    #[error("vm {0} is shut down")]
    VmShutDown(VmId),
    #[error("vm {vm} has type {vm_type}, task {task} requires {required}")]
    VmTypeMismatch {
        vm: VmId,
        vm_type: VmType,
        task: TaskId,
        required: VmType,
    },
}

/// Queries and commands offered by the cluster collaborator.
pub trait ClusterApi {
    /// Returns the number of physical machines. Machine IDs are `0..machine_count()`.
    fn machine_count(&self) -> u32;

    fn machine_info(&self, machine: MachineId) -> MachineInfo;

    fn vm_info(&self, vm: VmId) -> VmInfo;

    fn task_info(&self, task: TaskId) -> TaskInfo;

    /// Returns the total energy consumed by all machines.
    fn cluster_energy(&self) -> f64;

    /// Returns the percentage of completed tasks of the class that met their SLA.
    fn sla_report(&self, sla: SlaClass) -> f64;

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuArch) -> VmId;

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<(), ClusterError>;

    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<(), ClusterError>;

    fn shutdown_vm(&mut self, vm: VmId) -> Result<(), ClusterError>;

    fn set_machine_state(&mut self, machine: MachineId, state: PowerState) -> Result<(), ClusterError>;

    /// Starts asynchronous migration of the VM. Completion is reported by a separate event.
    fn migrate_vm(&mut self, vm: VmId, machine: MachineId) -> Result<(), ClusterError>;

    fn set_task_priority(&mut self, task: TaskId, priority: Priority);
}
