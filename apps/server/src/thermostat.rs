use crate::pid::Pid;
use tracing::{debug, info};

/// Heating demand from the PID power signal.
///
/// ON above `target + deadband`, OFF below `target - deadband`, otherwise the
/// previous demand is kept. With a zero deadband the demand only holds on
/// exact equality.
pub fn derive_heating_flag(
    power_signal: f64,
    active_target: f64,
    previous: bool,
    deadband: f64,
) -> bool {
    let dt = power_signal - active_target;
    if dt > deadband {
        true
    } else if dt < -deadband {
        false
    } else {
        previous
    }
}

#[derive(Debug, Clone)]
pub struct Thermostat {
    pid: Pid,
    active_target: f64,
    power_signal: f64,
    heating_demand: bool,
    deadband: f64,
    dt_seconds: f64,
}

impl Thermostat {
    pub fn new(initial_target: f64, deadband: f64, dt_seconds: f64) -> Self {
        info!(setpoint = initial_target, "initialising PID");
        Self {
            pid: Pid::new(initial_target),
            active_target: initial_target,
            power_signal: 0.0,
            heating_demand: false,
            deadband,
            dt_seconds,
        }
    }

    /// Runs the PID on `measurement`, first moving it to `target` if the
    /// target changed. Returns the new power signal.
    pub fn update_pid(&mut self, measurement: f64, target: f64) -> f64 {
        if target != self.active_target {
            info!(
                from = self.active_target,
                to = target,
                seed = self.power_signal,
                "reinitialising PID"
            );
            self.pid.reinitialize(target, self.power_signal);
            self.active_target = target;
        }
        self.power_signal = self.pid.update(measurement, self.dt_seconds);
        debug!(temperature = measurement, power = self.power_signal, "PID step");
        self.power_signal
    }

    pub fn update_demand(&mut self) -> bool {
        let demand = derive_heating_flag(
            self.power_signal,
            self.active_target,
            self.heating_demand,
            self.deadband,
        );
        if demand != self.heating_demand {
            debug!(power = self.power_signal, on = demand, "thermostat demand changed");
        }
        self.heating_demand = demand;
        demand
    }

    pub fn active_target(&self) -> f64 {
        self.active_target
    }

    pub fn power_signal(&self) -> f64 {
        self.power_signal
    }

    pub fn heating_demand(&self) -> bool {
        self.heating_demand
    }

    #[cfg(test)]
    pub fn pid(&self) -> &Pid {
        &self.pid
    }
}
