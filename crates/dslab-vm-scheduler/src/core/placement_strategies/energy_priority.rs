//! Energy-aware strategy based on the machine power queue.

use crate::core::cluster_api::{ClusterApi, TaskInfo};
use crate::core::cluster_state::ClusterState;
use crate::core::common::AdmissionVerdict;
use crate::core::placement::{check_admission, find_reusable_vm, PlacementDecision, PlacementStrategy};

/// Uses the machine with the lowest current power draw that passes admission.
///
/// Machines are popped from the energy queue until a suitable one is found. All popped machines are
/// pushed back with their current power draw, so the queue keeps holding the full roster.
pub struct EnergyPriority;

impl EnergyPriority {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementStrategy for EnergyPriority {
    fn name(&self) -> &str {
        "EnergyPriority"
    }

    fn select(
        &mut self,
        task: &TaskInfo,
        vm_memory_overhead: u64,
        state: &mut ClusterState,
        cluster: &dyn ClusterApi,
    ) -> Option<PlacementDecision> {
        let mut popped = Vec::new();
        let mut decision = None;

        while let Some(machine) = state.energy_queue_mut().pop() {
            popped.push(machine);
            if check_admission(&cluster.machine_info(machine), task, vm_memory_overhead) != AdmissionVerdict::Success {
                continue;
            }
            decision = Some(match find_reusable_vm(machine, task, state, cluster) {
                Some(vm) => PlacementDecision::Existing { vm, machine },
                None => PlacementDecision::NewVm { machine },
            });
            break;
        }

        for machine in popped {
            let power = cluster.machine_info(machine).power;
            state.energy_queue_mut().push(machine, power);
        }
        decision
    }
}
