//! Energy meter calculates the machine energy consumption.

/// Integrates piecewise-constant power over simulated time.
#[derive(Debug, Clone, Default)]
pub struct EnergyMeter {
    energy_consumed: f64,
    current_power: f64,
    prev_time: f64,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked each time the machine power consumption is changed to update the total energy consumption.
    pub fn update(&mut self, time: f64, power: f64) {
        self.energy_consumed += (time - self.prev_time) * self.current_power;
        self.current_power = power;
        self.prev_time = time;
    }

    pub fn current_power(&self) -> f64 {
        self.current_power
    }

    /// Returns the energy consumed up to the last update.
    pub fn energy_consumed(&self) -> f64 {
        self.energy_consumed
    }

    /// Returns the energy consumed up to the specified time, assuming power did not change since the last update.
    pub fn energy_consumed_at(&self, time: f64) -> f64 {
        self.energy_consumed + (time - self.prev_time).max(0.) * self.current_power
    }
}
