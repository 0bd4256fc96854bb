#![doc = include_str!("../readme.md")]

pub mod core;
pub mod experiment;
pub mod extensions;
pub mod simulation;

pub use crate::core::scheduler::Scheduler;
pub use simulation::ClusterSimulation;
