//! Task workloads: CSV traces and seeded random generation.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::common::{CpuArch, SlaClass, TaskId, VmType};
use crate::core::config::{MachineConfig, WorkloadConfig};

/// Task as it arrives to the cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Arrival time.
    pub arrival: f64,
    /// Run time of the task once it is placed.
    pub duration: f64,
    pub cpu: CpuArch,
    pub vm_type: VmType,
    /// Required memory in MB.
    pub memory: u64,
    pub sla: SlaClass,
}

/// Failure to load a task trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("can't open trace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse trace: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid task {task}: {message}")]
    Invalid { task: TaskId, message: String },
}

/// Reads tasks from CSV file with columns `id,arrival,duration,cpu,vm_type,memory,sla`.
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Vec<TaskSpec>, TraceError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_trace(file)
}

/// Parses CSV trace and returns tasks ordered by arrival time.
pub fn parse_trace<R: Read>(input: R) -> Result<Vec<TaskSpec>, TraceError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut tasks = Vec::new();
    let mut ids = HashSet::new();
    for record in reader.deserialize() {
        let task: TaskSpec = record?;
        if !ids.insert(task.id) {
            return Err(TraceError::Invalid {
                task: task.id,
                message: "duplicate task id".to_string(),
            });
        }
        if task.arrival < 0. || task.duration < 0. {
            return Err(TraceError::Invalid {
                task: task.id,
                message: "arrival and duration must be non-negative".to_string(),
            });
        }
        if task.vm_type == VmType::Invalid {
            return Err(TraceError::Invalid {
                task: task.id,
                message: "vm type is invalid".to_string(),
            });
        }
        tasks.push(task);
    }
    tasks.sort_by(|a, b| a.arrival.total_cmp(&b.arrival));
    Ok(tasks)
}

/// VM types a task of the architecture may request.
fn vm_types_for(cpu: CpuArch) -> &'static [VmType] {
    match cpu {
        CpuArch::X86 => &[VmType::Linux, VmType::LinuxRt, VmType::Win],
        CpuArch::Arm => &[VmType::Linux, VmType::LinuxRt, VmType::Win],
        CpuArch::Power => &[VmType::Aix, VmType::Linux],
        CpuArch::Riscv => &[VmType::Linux],
    }
}

/// Generates random workload for the machines.
///
/// Architectures are drawn from those present among the machines, inter-arrival times are exponential.
/// The same config always produces the same tasks.
pub fn generate_workload(config: &WorkloadConfig, machines: &[MachineConfig]) -> Vec<TaskSpec> {
    let mut archs: Vec<CpuArch> = machines.iter().map(|m| m.cpu).collect();
    archs.sort();
    archs.dedup();
    if archs.is_empty() {
        return Vec::new();
    }

    let mut rand = Pcg64::seed_from_u64(config.seed);
    let mut time = 0.;
    let mut tasks = Vec::with_capacity(config.task_count as usize);
    for id in 0..config.task_count {
        let u: f64 = rand.gen();
        time += -config.mean_interarrival * (1. - u).ln();
        let cpu = archs[rand.gen_range(0..archs.len())];
        let vm_types = vm_types_for(cpu);
        tasks.push(TaskSpec {
            id,
            arrival: time,
            duration: rand.gen_range(config.min_duration..=config.max_duration),
            cpu,
            vm_type: vm_types[rand.gen_range(0..vm_types.len())],
            memory: rand.gen_range(config.min_memory..=config.max_memory),
            sla: SlaClass::ALL[rand.gen_range(0..SlaClass::ALL.len())],
        });
    }
    tasks
}
