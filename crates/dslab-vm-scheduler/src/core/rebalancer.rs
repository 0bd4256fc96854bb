//! Energy-driven rebalancing by VM migration.

use simcore::{log_debug, log_error, log_info, log_trace};
use simcore::SimulationContext;

use crate::core::cluster_api::ClusterApi;
use crate::core::cluster_state::ClusterState;
use crate::core::common::{MachineId, VmId};

/// Migration issued during a rebalancing pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuedMigration {
    pub vm: VmId,
    pub from: MachineId,
    pub to: MachineId,
}

/// Splits machines ordered by ascending power draw into the low-power and the high-power half.
///
/// The low half gets `n / 2` machines, the high half gets the rest.
pub fn split_roster(ordered: &[MachineId]) -> (&[MachineId], &[MachineId]) {
    ordered.split_at(ordered.len() / 2)
}

/// Consolidates load onto high-power machines so that low-power ones can become empty and go to standby.
///
/// For every low-power machine the VM with the smallest non-zero memory workload is moved to the first
/// high-power machine that is active, has the same architecture and enough free memory for the workload
/// plus the VM overhead. At most one migration per low-power machine is issued in a pass.
pub struct Rebalancer {
    vm_memory_overhead: u64,
    ctx: SimulationContext,
}

impl Rebalancer {
    pub fn new(vm_memory_overhead: u64, ctx: SimulationContext) -> Self {
        Self { vm_memory_overhead, ctx }
    }

    pub fn rebalance(&mut self, state: &mut ClusterState, cluster: &mut dyn ClusterApi) -> Vec<IssuedMigration> {
        // keys may be stale, order by the current power draw
        let mut keyed: Vec<(f64, MachineId)> = state
            .energy_queue_mut()
            .drain_ordered()
            .into_iter()
            .map(|machine| (cluster.machine_info(machine).power, machine))
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let ordered: Vec<MachineId> = keyed.into_iter().map(|(_, machine)| machine).collect();
        let (low, high) = split_roster(&ordered);
        log_trace!(self.ctx, "rebalance: {} low-power and {} high-power machines", low.len(), high.len());

        let mut issued = Vec::new();
        for &source in low {
            let (vm, workload) = match self.lightest_vm(source, state, &*cluster) {
                Some(candidate) => candidate,
                None => continue,
            };
            let vm_cpu = cluster.vm_info(vm).cpu;

            let target = high.iter().copied().find(|&machine| {
                let info = cluster.machine_info(machine);
                info.is_active()
                    && info.cpu == vm_cpu
                    && info.memory_available() >= workload + self.vm_memory_overhead
            });
            let target = match target {
                Some(target) => target,
                None => {
                    log_debug!(self.ctx, "no target for vm {} from machine {}", vm, source);
                    continue;
                }
            };

            state.relocate(vm, source, target);
            if !state.mark_migrating(vm, target) {
                state.relocate(vm, target, source);
                continue;
            }
            match cluster.migrate_vm(vm, target) {
                Ok(()) => {
                    log_info!(
                        self.ctx,
                        "migrate vm {} from machine {} to machine {} (workload {})",
                        vm,
                        source,
                        target,
                        workload
                    );
                    issued.push(IssuedMigration {
                        vm,
                        from: source,
                        to: target,
                    });
                }
                Err(e) => {
                    log_error!(self.ctx, "failed to migrate vm {} to machine {}: {}", vm, target, e);
                    state.abort_migration(vm);
                }
            }
        }

        for machine in ordered {
            let power = cluster.machine_info(machine).power;
            state.energy_queue_mut().push(machine, power);
        }
        issued
    }

    /// Returns the non-migrating VM hosted by the machine with the smallest non-zero workload.
    fn lightest_vm(&self, machine: MachineId, state: &ClusterState, cluster: &dyn ClusterApi) -> Option<(VmId, u64)> {
        let mut result: Option<(VmId, u64)> = None;
        for &vm in state.vms_on(machine) {
            if state.is_migrating(vm) || state.host_of(vm) != Some(machine) {
                continue;
            }
            let workload: u64 = cluster
                .vm_info(vm)
                .active_tasks
                .iter()
                .map(|&task| cluster.task_info(task).required_memory)
                .sum();
            if workload == 0 {
                continue;
            }
            if result.map_or(true, |(_, min_workload)| workload < min_workload) {
                result = Some((vm, workload));
            }
        }
        result
    }
}
