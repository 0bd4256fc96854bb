//! Task placement strategies.

pub mod best_fit;
pub mod energy_priority;
pub mod round_robin;
