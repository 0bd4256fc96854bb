//! Round Robin strategy.

use crate::core::cluster_api::{ClusterApi, TaskInfo};
use crate::core::cluster_state::ClusterState;
use crate::core::common::AdmissionVerdict;
use crate::core::placement::{check_admission, find_reusable_vm, PlacementDecision, PlacementStrategy};

/// Scans machines cyclically starting from the cursor and uses the first one that passes admission.
///
/// On the chosen machine an existing non-migrating VM of the required type is reused if there is one.
/// The cursor then moves one past the chosen machine, so consecutive placements spread over the roster.
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Creates strategy that starts scanning from the machine at the given roster position.
    pub fn starting_at(position: usize) -> Self {
        Self { cursor: position }
    }
}

impl PlacementStrategy for RoundRobin {
    fn name(&self) -> &str {
        "RoundRobin"
    }

    fn select(
        &mut self,
        task: &TaskInfo,
        vm_memory_overhead: u64,
        state: &mut ClusterState,
        cluster: &dyn ClusterApi,
    ) -> Option<PlacementDecision> {
        let machines = state.machines();
        let count = machines.len();
        if count == 0 {
            return None;
        }
        self.cursor %= count;

        for offset in 0..count {
            let idx = (self.cursor + offset) % count;
            let machine = machines[idx];
            if check_admission(&cluster.machine_info(machine), task, vm_memory_overhead) != AdmissionVerdict::Success {
                continue;
            }
            self.cursor = (idx + 1) % count;
            return Some(match find_reusable_vm(machine, task, state, cluster) {
                Some(vm) => PlacementDecision::Existing { vm, machine },
                None => PlacementDecision::NewVm { machine },
            });
        }
        None
    }
}
