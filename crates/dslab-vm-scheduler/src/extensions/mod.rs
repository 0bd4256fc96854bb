//! In-memory cluster used to run and test the scheduler.

pub mod energy_meter;
pub mod power_model;
pub mod sim_cluster;
pub mod workload;
