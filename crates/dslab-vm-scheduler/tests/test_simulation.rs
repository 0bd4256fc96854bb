use dslab_vm_scheduler::core::cluster_api::ClusterApi;
use dslab_vm_scheduler::core::common::{CpuArch, PowerState, Priority, SlaClass, VmType};
use dslab_vm_scheduler::core::config::SimulationConfig;
use dslab_vm_scheduler::experiment::{save_reports, Experiment};
use dslab_vm_scheduler::extensions::workload::TaskSpec;
use dslab_vm_scheduler::simulation::SimulationError;
use dslab_vm_scheduler::ClusterSimulation;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn single_machine_config() -> SimulationConfig {
    SimulationConfig::from_yaml(
        "
scheduler:
  placement: BestFit
  init_default_vms: false
machines:
  - name: m
    cpu: x86
    memory: 16384
    idle_power: 100
    max_power: 200
    standby_power: 10
periodic_check_interval: 5.0
",
    )
    .unwrap()
}

fn task(id: u32, arrival: f64, duration: f64, memory: u64) -> TaskSpec {
    TaskSpec {
        id,
        arrival,
        duration,
        cpu: CpuArch::X86,
        vm_type: VmType::Linux,
        memory,
        sla: SlaClass::Sla0,
    }
}

#[test]
// The ARM task of the trace has no machine to run on, all other tasks complete in time.
fn test_trace_simulation() {
    init_logger();
    let mut sim = ClusterSimulation::from_file(name_wrapper("config.yaml")).unwrap();
    let report = sim.run();

    assert_eq!(report.strategy, "BestFit");
    assert_eq!(report.tasks_total, 12);
    assert_eq!(report.tasks_completed, 11);
    assert_eq!(report.tasks_unplaced, 1);
    assert_eq!(report.scheduler.tasks_received, 12);
    assert_eq!(report.scheduler.tasks_completed, 11);
    for sla in ["SLA0", "SLA1", "SLA2", "SLA3"] {
        assert_eq!(report.sla_compliance[sla], 100.);
    }
    assert_eq!(report.machines.len(), 4);
    assert_eq!(report.machines[3].name, "power-0");
    assert!(report.total_energy > 0.);
    assert_eq!(report.scheduler.migrations_completed, report.scheduler.migrations_issued);
    assert!(sim.scheduler().borrow().is_shut_down());

    let cluster = sim.cluster();
    for machine in 0..4 {
        let info = cluster.borrow().machine_info(machine);
        assert_eq!(info.memory_used, 0);
    }
}

#[test]
// Task of 10000 runs for 10 seconds on a machine drawing 100 + 100 * used / 16384.
// The VM created for the task stays on the machine, so it is not put to standby.
fn test_energy_of_single_task() {
    let config = single_machine_config();
    let mut sim = ClusterSimulation::with_tasks(config, vec![task(0, 0., 10., 10000)]).unwrap();
    let report = sim.run();

    assert_eq!(report.end_time, 10.);
    assert_eq!(report.machines[0].state, PowerState::Active);
    let busy_power = 100. + 100. * 11024. / 16384.;
    assert!((report.total_energy - busy_power * 10.).abs() < 1e-6);
    assert_eq!(report.scheduler.vms_created, 1);
    assert_eq!(report.scheduler.machines_deactivated, 0);
}

#[test]
// Second task does not fit next to the first one and is placed when the first one completes.
fn test_backlog_in_simulation() {
    init_logger();
    let mut config = single_machine_config();
    config.scheduler.retry_unplaced = true;
    let tasks = vec![task(0, 0., 10., 8000), task(1, 1., 10., 8000)];
    let mut sim = ClusterSimulation::with_tasks(config, tasks).unwrap();
    let report = sim.run();

    assert_eq!(report.tasks_completed, 2);
    assert_eq!(report.tasks_unplaced, 0);
    // task 1 fails on arrival and on the periodic check at time 5
    assert_eq!(report.scheduler.placement_failures, 2);
    // task 1 starts at 10 and finishes at 20, after its deadline 1 + 10 * 1.2
    assert_eq!(report.sla_compliance["SLA0"], 50.);
}

#[test]
// Without the backlog the second task is dropped, and the SLA warning for it raises its priority.
fn test_sla_warning_for_unplaced_task() {
    let config = single_machine_config();
    let mut second = task(1, 1., 10., 8000);
    second.sla = SlaClass::Sla2;
    let mut sim = ClusterSimulation::with_tasks(config, vec![task(0, 0., 10., 8000), second]).unwrap();
    let report = sim.run();

    assert_eq!(report.tasks_completed, 1);
    assert_eq!(report.tasks_unplaced, 1);
    assert_eq!(report.scheduler.placement_failures, 1);
    assert_eq!(report.end_time, 10.);
    assert_eq!(sim.cluster().borrow().task_info(1).priority, Priority::High);
}

#[test]
fn test_generated_workload_is_deterministic() {
    let config = SimulationConfig::from_file(name_wrapper("config_generated.yaml")).unwrap();
    let first = ClusterSimulation::new(config.clone()).unwrap().run();
    let second = ClusterSimulation::new(config).unwrap().run();

    assert_eq!(first.tasks_total, 200);
    assert_eq!(first.tasks_completed + first.tasks_unplaced, 200);
    assert_eq!(first.tasks_completed, second.tasks_completed);
    assert_eq!(first.scheduler, second.scheduler);
    assert_eq!(first.total_energy, second.total_energy);
    assert_eq!(first.end_time, second.end_time);
}

#[test]
fn test_experiment_compares_strategies() {
    let config = SimulationConfig::from_file(name_wrapper("config.yaml")).unwrap();
    let reports = Experiment::with_all_strategies(config).run(2).unwrap();

    let strategies: Vec<&str> = reports.keys().map(|s| s.as_str()).collect();
    assert_eq!(strategies, vec!["BestFit", "RoundRobin", "EnergyPriority"]);
    for (strategy, report) in reports.iter() {
        assert_eq!(&report.strategy, strategy);
        assert_eq!(report.tasks_completed + report.tasks_unplaced, 12);
    }

    let path = std::env::temp_dir().join("dslab-vm-scheduler-experiment.json");
    save_reports(&path, &reports).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["RoundRobin"]["tasks_total"], 12);
}

#[test]
fn test_missing_trace_is_reported() {
    let mut config = single_machine_config();
    config.trace = Some(name_wrapper("missing.csv"));
    assert!(matches!(ClusterSimulation::new(config), Err(SimulationError::Trace(_))));
}

#[test]
fn test_unknown_strategy_is_reported() {
    let mut config = single_machine_config();
    config.scheduler.placement = "Magic".to_string();
    assert!(matches!(ClusterSimulation::new(config), Err(SimulationError::Config(_))));
}
