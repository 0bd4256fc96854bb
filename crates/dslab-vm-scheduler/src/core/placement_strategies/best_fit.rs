//! Best Fit (existing VMs first) strategy.

use crate::core::cluster_api::{ClusterApi, TaskInfo};
use crate::core::cluster_state::ClusterState;
use crate::core::common::{AdmissionVerdict, MachineId, VmId};
use crate::core::placement::{check_admission, PlacementDecision, PlacementStrategy};

/// Reuses the eligible VM with the fewest running tasks, otherwise creates a VM on the first suitable machine.
///
/// A VM is eligible if it has the required type, is not being migrated and its host passes admission.
/// Ties are broken by the lowest VM ID.
pub struct BestFitExisting;

impl BestFitExisting {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementStrategy for BestFitExisting {
    fn name(&self) -> &str {
        "BestFit"
    }

    fn select(
        &mut self,
        task: &TaskInfo,
        vm_memory_overhead: u64,
        state: &mut ClusterState,
        cluster: &dyn ClusterApi,
    ) -> Option<PlacementDecision> {
        let mut best: Option<(VmId, MachineId)> = None;
        let mut min_tasks = usize::MAX;

        for &vm in state.vms() {
            if state.is_migrating(vm) {
                continue;
            }
            let machine = match state.host_of(vm) {
                Some(machine) => machine,
                None => continue,
            };
            let vm_info = cluster.vm_info(vm);
            if vm_info.vm_type != task.required_vm {
                continue;
            }
            if check_admission(&cluster.machine_info(machine), task, vm_memory_overhead) != AdmissionVerdict::Success {
                continue;
            }
            let tasks = vm_info.active_tasks.len();
            let better = match best {
                None => true,
                Some((best_vm, _)) => tasks < min_tasks || (tasks == min_tasks && vm < best_vm),
            };
            if better {
                min_tasks = tasks;
                best = Some((vm, machine));
            }
        }

        if let Some((vm, machine)) = best {
            return Some(PlacementDecision::Existing { vm, machine });
        }

        state
            .machines()
            .iter()
            .copied()
            .find(|&machine| {
                check_admission(&cluster.machine_info(machine), task, vm_memory_overhead) == AdmissionVerdict::Success
            })
            .map(|machine| PlacementDecision::NewVm { machine })
    }
}
