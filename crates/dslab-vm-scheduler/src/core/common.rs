//! Identifiers and small value types shared by the engine and the cluster collaborator.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type MachineId = u32;
pub type VmId = u32;
pub type TaskId = u32;

/// CPU architecture of a machine, a VM or a task requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuArch {
    X86,
    Arm,
    Power,
    Riscv,
}

impl Display for CpuArch {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CpuArch::X86 => write!(f, "x86"),
            CpuArch::Arm => write!(f, "arm"),
            CpuArch::Power => write!(f, "power"),
            CpuArch::Riscv => write!(f, "riscv"),
        }
    }
}

impl FromStr for CpuArch {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "x86" => Ok(CpuArch::X86),
            "arm" => Ok(CpuArch::Arm),
            "power" => Ok(CpuArch::Power),
            "riscv" => Ok(CpuArch::Riscv),
            _ => Err(format!("unknown cpu architecture: {}", input)),
        }
    }
}

/// VM image type required by a task.
///
/// `Invalid` is the sentinel returned when no default image exists for an architecture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmType {
    Linux,
    LinuxRt,
    Win,
    Aix,
    Invalid,
}

impl Display for VmType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VmType::Linux => write!(f, "linux"),
            VmType::LinuxRt => write!(f, "linux_rt"),
            VmType::Win => write!(f, "win"),
            VmType::Aix => write!(f, "aix"),
            VmType::Invalid => write!(f, "invalid"),
        }
    }
}

impl FromStr for VmType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "linux" => Ok(VmType::Linux),
            "linux_rt" => Ok(VmType::LinuxRt),
            "win" => Ok(VmType::Win),
            "aix" => Ok(VmType::Aix),
            _ => Err(format!("unknown vm type: {}", input)),
        }
    }
}

/// Service level agreement class of a task.
///
/// `Sla3` is best-effort and never counts as violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlaClass {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

impl SlaClass {
    pub const ALL: [SlaClass; 4] = [SlaClass::Sla0, SlaClass::Sla1, SlaClass::Sla2, SlaClass::Sla3];

    /// Scheduling priority derived from the SLA class.
    pub fn priority(&self) -> Priority {
        match self {
            SlaClass::Sla0 | SlaClass::Sla1 => Priority::High,
            SlaClass::Sla2 => Priority::Mid,
            SlaClass::Sla3 => Priority::Low,
        }
    }
}

impl Display for SlaClass {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SlaClass::Sla0 => write!(f, "SLA0"),
            SlaClass::Sla1 => write!(f, "SLA1"),
            SlaClass::Sla2 => write!(f, "SLA2"),
            SlaClass::Sla3 => write!(f, "SLA3"),
        }
    }
}

impl FromStr for SlaClass {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_uppercase().as_str() {
            "SLA0" => Ok(SlaClass::Sla0),
            "SLA1" => Ok(SlaClass::Sla1),
            "SLA2" => Ok(SlaClass::Sla2),
            "SLA3" => Ok(SlaClass::Sla3),
            _ => Err(format!("unknown sla class: {}", input)),
        }
    }
}

/// Task scheduling priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Mid,
    Low,
}

/// Power state of a physical machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Active,
    Standby,
}

impl Display for PowerState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PowerState::Active => write!(f, "active"),
            PowerState::Standby => write!(f, "standby"),
        }
    }
}

/// Result of checking whether a task can be admitted on a machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionVerdict {
    MachineNotActive,
    ArchMismatch,
    NotEnoughMemory,
    Success,
}
