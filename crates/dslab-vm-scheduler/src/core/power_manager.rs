//! Power management of physical machines.

use std::collections::HashMap;

use simcore::{log_debug, log_error};
use simcore::SimulationContext;

use crate::core::cluster_api::{ClusterApi, ClusterError, TaskInfo};
use crate::core::cluster_state::ClusterState;
use crate::core::common::{MachineId, PowerState};

/// Puts empty machines to standby on periodic checks and wakes them up when placement needs capacity.
///
/// A machine is empty if it runs no tasks and hosts no VMs, including VMs provisionally attached to it
/// by an in-flight migration. With a grace period of `n` checks the machine goes to standby on the
/// `n + 1`-th consecutive check that finds it empty.
pub struct PowerManager {
    grace_checks: u32,
    idle_checks: HashMap<MachineId, u32>,
    ctx: SimulationContext,
}

impl PowerManager {
    pub fn new(grace_checks: u32, ctx: SimulationContext) -> Self {
        Self {
            grace_checks,
            idle_checks: HashMap::new(),
            ctx,
        }
    }

    /// Powers down the machines found empty and returns them.
    pub fn on_periodic_check(&mut self, state: &ClusterState, cluster: &mut dyn ClusterApi) -> Vec<MachineId> {
        let mut powered_down = Vec::new();

        for &machine in state.machines() {
            let info = cluster.machine_info(machine);
            let empty = info.active_tasks == 0 && info.active_vms == 0 && state.vms_on(machine).is_empty();
            if !info.is_active() || !empty {
                self.idle_checks.remove(&machine);
                continue;
            }

            let checks = self.idle_checks.entry(machine).or_insert(0);
            *checks += 1;
            if *checks <= self.grace_checks {
                log_debug!(self.ctx, "machine {} is idle for {} checks", machine, checks);
                continue;
            }

            match cluster.set_machine_state(machine, PowerState::Standby) {
                Ok(()) => {
                    log_debug!(self.ctx, "machine {} goes to standby", machine);
                    self.idle_checks.remove(&machine);
                    powered_down.push(machine);
                }
                Err(e) => log_error!(self.ctx, "failed to put machine {} to standby: {}", machine, e),
            }
        }
        powered_down
    }

    /// Returns the first standby machine of the task architecture with enough memory for the task and a new VM.
    pub fn find_standby_machine(
        &self,
        task: &TaskInfo,
        vm_memory_overhead: u64,
        state: &ClusterState,
        cluster: &dyn ClusterApi,
    ) -> Option<MachineId> {
        state.machines().iter().copied().find(|&machine| {
            let info = cluster.machine_info(machine);
            info.state == PowerState::Standby
                && info.cpu == task.required_cpu
                && info.memory_available() >= task.required_memory + vm_memory_overhead
        })
    }

    /// Wakes up the machine.
    pub fn activate(&mut self, machine: MachineId, cluster: &mut dyn ClusterApi) -> Result<(), ClusterError> {
        cluster.set_machine_state(machine, PowerState::Active)?;
        self.idle_checks.remove(&machine);
        Ok(())
    }
}
