use std::cell::RefCell;
use std::rc::Rc;

use simcore::Simulation;
use sugars::{rc, refcell};

use dslab_vm_scheduler::core::cluster_api::{ClusterApi, ClusterError, MachineInfo, TaskInfo, VmInfo};
use dslab_vm_scheduler::core::common::{
    CpuArch, MachineId, PowerState, Priority, SlaClass, TaskId, VmId, VmType,
};
use dslab_vm_scheduler::core::config::{SchedulerConfig, SlaSlackConfig};
use dslab_vm_scheduler::core::placement::{find_reusable_vm, PlacementOutcome};
use dslab_vm_scheduler::core::rebalancer::split_roster;
use dslab_vm_scheduler::extensions::power_model::LinearPowerModel;
use dslab_vm_scheduler::extensions::sim_cluster::SimCluster;
use dslab_vm_scheduler::extensions::workload::TaskSpec;
use dslab_vm_scheduler::Scheduler;

fn create_cluster(sim: &mut Simulation, machines: u32) -> SimCluster {
    let mut cluster = SimCluster::new(sim.create_context("cluster"), 1024, SlaSlackConfig::default());
    for i in 0..machines {
        cluster.add_machine(
            &format!("m{}", i),
            CpuArch::X86,
            16384,
            Box::new(LinearPowerModel::new(100., 200., 10.)),
        );
    }
    cluster
}

fn task(id: TaskId, memory: u64) -> TaskSpec {
    TaskSpec {
        id,
        arrival: 0.,
        duration: 10.,
        cpu: CpuArch::X86,
        vm_type: VmType::Linux,
        memory,
        sla: SlaClass::Sla2,
    }
}

fn submit<C: ClusterApi + SubmitTask>(
    cluster: &Rc<RefCell<C>>,
    scheduler: &mut Scheduler,
    spec: TaskSpec,
) -> PlacementOutcome {
    let id = spec.id;
    cluster.borrow_mut().submit(spec);
    scheduler.on_new_task(id)
}

trait SubmitTask {
    fn submit(&mut self, spec: TaskSpec);
}

impl SubmitTask for SimCluster {
    fn submit(&mut self, spec: TaskSpec) {
        self.submit_task(spec);
    }
}

/// Places three tasks so that machine 0 hosts VM 0 with tasks 0 (2000) and 2 (500)
/// and machine 1 hosts VM 1 with task 1 (6000).
fn load_two_machines<C: ClusterApi + SubmitTask + 'static>(cluster: &Rc<RefCell<C>>, scheduler: &mut Scheduler) {
    scheduler.init();
    submit(cluster, scheduler, task(0, 2000));
    submit(cluster, scheduler, task(1, 6000));
    submit(cluster, scheduler, task(2, 500));
}

#[test]
fn test_split_roster_covers_all_machines() {
    for n in 0..10u32 {
        let ordered: Vec<MachineId> = (0..n).rev().collect();
        let (low, high) = split_roster(&ordered);
        assert_eq!(low.len() as u32, n / 2);
        assert_eq!(high.len() as u32, n - n / 2);
        let mut all: Vec<MachineId> = low.iter().chain(high.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..n).collect::<Vec<_>>());
    }
}

#[test]
// After task 2 completes machine 0 (3024 used) has lower power than machine 1 (7024 used), so VM 0 with
// workload 2000 moves to machine 1. While the migration is in flight VM 0 is not used for new tasks even
// though best fit would otherwise prefer it (same task count, lower ID).
fn test_lightest_vm_migrates_to_high_power_machine() {
    let mut sim = Simulation::new(123);
    let cluster = rc!(refcell!(create_cluster(&mut sim, 2)));
    let mut scheduler = Scheduler::new(cluster.clone(), SchedulerConfig::with_placement("BestFit"), &mut sim).unwrap();
    load_two_machines(&cluster, &mut scheduler);
    assert_eq!(cluster.borrow().task_vm(0), Some(0));
    assert_eq!(cluster.borrow().task_vm(1), Some(1));
    assert_eq!(cluster.borrow().task_vm(2), Some(0));

    sim.step_until_time(5.);
    cluster.borrow_mut().finish_task(2);
    scheduler.on_task_complete(2);

    assert_eq!(scheduler.stats().migrations_issued, 1);
    assert!(scheduler.state().is_migrating(0));
    assert_eq!(scheduler.state().host_of(0), Some(0));
    assert!(scheduler.state().vms_on(0).is_empty());
    assert_eq!(scheduler.state().vms_on(1), &[1, 0]);
    assert_eq!(cluster.borrow().migration_target(0), Some(1));
    // memory of the migrating VM is held on both machines
    assert_eq!(cluster.borrow().machine_info(0).memory_used, 3024);
    assert_eq!(cluster.borrow().machine_info(1).memory_used, 7024 + 3024);

    let outcome = submit(&cluster, &mut scheduler, task(3, 1000));
    assert_eq!(
        outcome,
        PlacementOutcome::Placed {
            vm: 1,
            machine: 1,
            new_vm: false,
            activated: false
        }
    );

    sim.step_until_time(8.);
    cluster.borrow_mut().finish_migration(0);
    scheduler.on_migration_complete(0);
    assert!(!scheduler.state().is_migrating(0));
    assert_eq!(scheduler.state().host_of(0), Some(1));
    assert_eq!(scheduler.stats().migrations_completed, 1);
    assert_eq!(cluster.borrow().machine_info(0).memory_used, 0);

    // the drained machine goes to standby, the loaded one stays active
    scheduler.on_periodic_check();
    assert_eq!(cluster.borrow().machine_info(0).state, PowerState::Standby);
    assert_eq!(cluster.borrow().machine_info(1).state, PowerState::Active);
}

/// Places Linux tasks 0 (2000) and 2 (500) on a new VM 0 of machine 0 and Windows task 1 (6000)
/// on a new VM 1 of machine 1, then completes task 2 so that VM 0 starts migrating to machine 1.
fn start_migration_of_linux_vm(sim: &mut Simulation, placement: &str) -> (Rc<RefCell<SimCluster>>, Scheduler) {
    let cluster = rc!(refcell!(create_cluster(sim, 2)));
    let config = SchedulerConfig {
        init_default_vms: false,
        ..SchedulerConfig::with_placement(placement)
    };
    let mut scheduler = Scheduler::new(cluster.clone(), config, sim).unwrap();
    scheduler.init();
    let mut win_task = task(1, 6000);
    win_task.vm_type = VmType::Win;
    for spec in [task(0, 2000), win_task, task(2, 500)] {
        submit(&cluster, &mut scheduler, spec);
    }
    assert_eq!(cluster.borrow().task_vm(0), Some(0));
    assert_eq!(cluster.borrow().task_vm(1), Some(1));
    assert_eq!(cluster.borrow().task_vm(2), Some(0));

    sim.step_until_time(5.);
    cluster.borrow_mut().finish_task(2);
    scheduler.on_task_complete(2);
    assert!(scheduler.state().is_migrating(0));
    assert_eq!(scheduler.state().vms_on(1), &[1, 0]);
    (cluster, scheduler)
}

#[test]
// Round robin visits machine 1 and then machine 0, neither visit reuses the migrating VM 0.
// After the migration completes VM 0 is the first Linux VM of machine 1 and gets the next task there.
fn test_round_robin_skips_migrating_vm() {
    let mut sim = Simulation::new(123);
    let (cluster, mut scheduler) = start_migration_of_linux_vm(&mut sim, "RoundRobin");

    let on_target = submit(&cluster, &mut scheduler, task(3, 1000));
    assert_eq!(
        on_target,
        PlacementOutcome::Placed {
            vm: 2,
            machine: 1,
            new_vm: true,
            activated: false
        }
    );
    let on_source = submit(&cluster, &mut scheduler, task(4, 1000));
    assert_eq!(
        on_source,
        PlacementOutcome::Placed {
            vm: 3,
            machine: 0,
            new_vm: true,
            activated: false
        }
    );
    assert_ne!(cluster.borrow().task_vm(3), Some(0));
    assert_ne!(cluster.borrow().task_vm(4), Some(0));

    sim.step_until_time(8.);
    cluster.borrow_mut().finish_migration(0);
    scheduler.on_migration_complete(0);
    let outcome = submit(&cluster, &mut scheduler, task(5, 1000));
    assert_eq!(
        outcome,
        PlacementOutcome::Placed {
            vm: 0,
            machine: 1,
            new_vm: false,
            activated: false
        }
    );
}

#[test]
// Machine 0 keeps the lowest power draw, so energy priority places the next Linux task there
// on a new VM instead of reusing the migrating VM 0. VM 0 becomes reusable on machine 1
// only after the migration completes.
fn test_energy_priority_skips_migrating_vm() {
    let mut sim = Simulation::new(123);
    let (cluster, mut scheduler) = start_migration_of_linux_vm(&mut sim, "EnergyPriority");

    let linux_task = cluster.borrow().task_info(0);
    assert_eq!(find_reusable_vm(1, &linux_task, scheduler.state(), &*cluster.borrow()), None);

    let outcome = submit(&cluster, &mut scheduler, task(3, 1000));
    assert_eq!(
        outcome,
        PlacementOutcome::Placed {
            vm: 2,
            machine: 0,
            new_vm: true,
            activated: false
        }
    );
    assert_ne!(cluster.borrow().task_vm(3), Some(0));

    sim.step_until_time(8.);
    cluster.borrow_mut().finish_migration(0);
    scheduler.on_migration_complete(0);
    assert_eq!(find_reusable_vm(1, &linux_task, scheduler.state(), &*cluster.borrow()), Some(0));
}

#[test]
fn test_rebalancing_can_be_disabled() {
    let mut sim = Simulation::new(123);
    let cluster = rc!(refcell!(create_cluster(&mut sim, 2)));
    let config = SchedulerConfig {
        rebalance_on_task_complete: false,
        ..SchedulerConfig::with_placement("BestFit")
    };
    let mut scheduler = Scheduler::new(cluster.clone(), config, &mut sim).unwrap();
    load_two_machines(&cluster, &mut scheduler);

    cluster.borrow_mut().finish_task(2);
    scheduler.on_task_complete(2);
    assert_eq!(scheduler.stats().migrations_issued, 0);
    assert_eq!(scheduler.state().migrating_count(), 0);
}

#[test]
fn test_periodic_rebalancing() {
    let mut sim = Simulation::new(123);
    let cluster = rc!(refcell!(create_cluster(&mut sim, 2)));
    let config = SchedulerConfig {
        rebalance_on_task_complete: false,
        rebalance_on_periodic_check: true,
        ..SchedulerConfig::with_placement("BestFit")
    };
    let mut scheduler = Scheduler::new(cluster.clone(), config, &mut sim).unwrap();
    load_two_machines(&cluster, &mut scheduler);

    scheduler.on_periodic_check();
    assert_eq!(scheduler.stats().migrations_issued, 1);
    assert!(scheduler.state().is_migrating(0));

    // the VM is already migrating, no second migration is issued
    scheduler.on_periodic_check();
    assert_eq!(scheduler.stats().migrations_issued, 1);
}

#[test]
fn test_unknown_migration_completion_is_ignored() {
    let mut sim = Simulation::new(123);
    let cluster = rc!(refcell!(create_cluster(&mut sim, 2)));
    let mut scheduler = Scheduler::new(cluster.clone(), SchedulerConfig::default(), &mut sim).unwrap();
    scheduler.init();

    scheduler.on_migration_complete(0);
    assert_eq!(scheduler.stats().migrations_completed, 0);
    assert_eq!(scheduler.state().host_of(0), Some(0));
}

/// Cluster that rejects every migration command and, if asked to, every VM attachment.
struct RejectingCluster {
    inner: SimCluster,
    reject_attach: bool,
    rejected: u32,
}

impl SubmitTask for RejectingCluster {
    fn submit(&mut self, spec: TaskSpec) {
        self.inner.submit_task(spec);
    }
}

impl ClusterApi for RejectingCluster {
    fn machine_count(&self) -> u32 {
        self.inner.machine_count()
    }

    fn machine_info(&self, machine: MachineId) -> MachineInfo {
        self.inner.machine_info(machine)
    }

    fn vm_info(&self, vm: VmId) -> VmInfo {
        self.inner.vm_info(vm)
    }

    fn task_info(&self, task: TaskId) -> TaskInfo {
        self.inner.task_info(task)
    }

    fn cluster_energy(&self) -> f64 {
        self.inner.cluster_energy()
    }

    fn sla_report(&self, sla: SlaClass) -> f64 {
        self.inner.sla_report(sla)
    }

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuArch) -> VmId {
        self.inner.create_vm(vm_type, cpu)
    }

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<(), ClusterError> {
        if self.reject_attach {
            self.rejected += 1;
            return Err(ClusterError::MachineNotActive(machine));
        }
        self.inner.attach_vm(vm, machine)
    }

    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<(), ClusterError> {
        self.inner.add_task(vm, task, priority)
    }

    fn shutdown_vm(&mut self, vm: VmId) -> Result<(), ClusterError> {
        self.inner.shutdown_vm(vm)
    }

    fn set_machine_state(&mut self, machine: MachineId, state: PowerState) -> Result<(), ClusterError> {
        self.inner.set_machine_state(machine, state)
    }

    fn migrate_vm(&mut self, vm: VmId, _machine: MachineId) -> Result<(), ClusterError> {
        self.rejected += 1;
        Err(ClusterError::VmMigrating(vm))
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) {
        self.inner.set_task_priority(task, priority)
    }
}

#[test]
// Rejected migration command leaves the state as it was before the decision.
fn test_rejected_migration_is_rolled_back() {
    let mut sim = Simulation::new(123);
    let cluster = rc!(refcell!(RejectingCluster {
        inner: create_cluster(&mut sim, 2),
        reject_attach: false,
        rejected: 0,
    }));
    let mut scheduler = Scheduler::new(cluster.clone(), SchedulerConfig::with_placement("BestFit"), &mut sim).unwrap();
    load_two_machines(&cluster, &mut scheduler);

    cluster.borrow_mut().inner.finish_task(2);
    scheduler.on_task_complete(2);

    assert_eq!(cluster.borrow().rejected, 1);
    assert_eq!(scheduler.stats().migrations_issued, 0);
    assert!(!scheduler.state().is_migrating(0));
    assert_eq!(scheduler.state().vms_on(0), &[0]);
    assert_eq!(scheduler.state().vms_on(1), &[1]);
    assert_eq!(scheduler.state().host_of(0), Some(0));
    assert_eq!(scheduler.state().energy_queue().len(), 2);

    // VM 0 is usable again
    let outcome = submit(&cluster, &mut scheduler, task(3, 1000));
    assert_eq!(
        outcome,
        PlacementOutcome::Placed {
            vm: 0,
            machine: 0,
            new_vm: false,
            activated: false
        }
    );
}

#[test]
// VM whose attachment is rejected is shut down and never enters the scheduler's roster.
fn test_rejected_vm_attach_is_not_registered() {
    let mut sim = Simulation::new(123);
    let cluster = rc!(refcell!(RejectingCluster {
        inner: create_cluster(&mut sim, 1),
        reject_attach: true,
        rejected: 0,
    }));
    let config = SchedulerConfig {
        init_default_vms: false,
        ..SchedulerConfig::with_placement("BestFit")
    };
    let mut scheduler = Scheduler::new(cluster.clone(), config, &mut sim).unwrap();
    scheduler.init();

    let outcome = submit(&cluster, &mut scheduler, task(0, 1000));
    assert_eq!(outcome, PlacementOutcome::Unplaceable);
    assert_eq!(cluster.borrow().rejected, 1);
    assert!(scheduler.state().vms().is_empty());
    assert!(scheduler.state().vms_on(0).is_empty());
    assert_eq!(scheduler.stats().vms_created, 0);
    assert_eq!(cluster.borrow().vm_info(0).machine, None);
    assert_eq!(cluster.borrow().machine_info(0).memory_used, 0);
}
