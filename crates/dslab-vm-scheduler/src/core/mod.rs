pub mod cluster_api;
pub mod cluster_state;
pub mod common;
pub mod config;
pub mod energy_queue;
pub mod events;
pub mod placement;
pub mod placement_strategies;
pub mod power_manager;
pub mod rebalancer;
pub mod scheduler;
