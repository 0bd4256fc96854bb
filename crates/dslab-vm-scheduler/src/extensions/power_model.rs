//! Machine power consumption models.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::common::PowerState;

/// Power model is a function, which computes the power consumption of a machine
/// based on its power state and current memory utilization.
pub trait PowerModel: DynClone {
    /// Returns the current power consumption of a machine.
    ///
    /// - `state` - machine power state.
    /// - `utilization` - used memory as a fraction of total memory.
    fn get_power(&self, state: PowerState, utilization: f64) -> f64;
}

clone_trait_object!(PowerModel);

pub const DEFAULT_IDLE_POWER: f64 = 100.;
pub const DEFAULT_MAX_POWER: f64 = 250.;
pub const DEFAULT_STANDBY_POWER: f64 = 10.;

/// Linear power model.
///
/// An active machine consumes `idle_power + (max_power - idle_power) * utilization`,
/// a machine in standby consumes `standby_power`.
#[derive(Clone, Debug)]
pub struct LinearPowerModel {
    idle_power: f64,
    max_power: f64,
    standby_power: f64,
}

impl LinearPowerModel {
    pub fn new(idle_power: f64, max_power: f64, standby_power: f64) -> Self {
        Self {
            idle_power,
            max_power,
            standby_power,
        }
    }
}

impl Default for LinearPowerModel {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_POWER, DEFAULT_MAX_POWER, DEFAULT_STANDBY_POWER)
    }
}

impl PowerModel for LinearPowerModel {
    fn get_power(&self, state: PowerState, utilization: f64) -> f64 {
        match state {
            PowerState::Active => self.idle_power + (self.max_power - self.idle_power) * utilization.clamp(0., 1.),
            PowerState::Standby => self.standby_power,
        }
    }
}
