//! PID controller value type.
//!
//! Proportional and integral terms act on the error, the derivative term on
//! the measurement, so a setpoint change never kicks the output through the
//! derivative. The integral is clamped to the output limits.

pub const KP: f64 = 1.0;
pub const KI: f64 = 0.1;
pub const KD: f64 = 0.05;

/// Upper output limit is the setpoint plus this margin.
pub const OUTPUT_HEADROOM: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    output_limits: (f64, f64),
    integral: f64,
    last_measurement: Option<f64>,
    last_output: f64,
}

impl Pid {
    pub fn new(setpoint: f64) -> Self {
        Self {
            kp: KP,
            ki: KI,
            kd: KD,
            setpoint,
            output_limits: limits_for(setpoint),
            integral: 0.0,
            last_measurement: None,
            last_output: 0.0,
        }
    }

    /// A controller for `setpoint` that continues from `seed_output` as if it
    /// had produced that output at `last_measurement`.
    #[cfg(test)]
    pub fn seeded(setpoint: f64, seed_output: f64, last_measurement: Option<f64>) -> Self {
        let mut pid = Pid::new(setpoint);
        pid.last_measurement = last_measurement;
        pid.reinitialize(setpoint, seed_output);
        pid
    }

    /// Moves to a new setpoint without an output step.
    ///
    /// The integral is re-based so that the new setpoint evaluated at the last
    /// measurement reproduces `seed_output`; the last measurement is kept so
    /// the next derivative only sees real process change.
    pub fn reinitialize(&mut self, new_setpoint: f64, seed_output: f64) {
        self.setpoint = new_setpoint;
        self.output_limits = limits_for(new_setpoint);
        let proportional = match self.last_measurement {
            Some(m) => self.kp * (new_setpoint - m),
            None => 0.0,
        };
        self.integral = self.clamp(seed_output - proportional);
        self.last_output = self.clamp(seed_output);
    }

    /// One control step over `dt` seconds.
    pub fn update(&mut self, measurement: f64, dt: f64) -> f64 {
        let error = self.setpoint - measurement;
        let proportional = self.kp * error;

        self.integral = self.clamp(self.integral + self.ki * error * dt);

        let derivative = match self.last_measurement {
            Some(prev) if dt > 0.0 => -self.kd * (measurement - prev) / dt,
            _ => 0.0,
        };

        let output = self.clamp(proportional + self.integral + derivative);
        self.last_measurement = Some(measurement);
        self.last_output = output;
        output
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn output_limits(&self) -> (f64, f64) {
        self.output_limits
    }

    #[cfg(test)]
    pub fn integral(&self) -> f64 {
        self.integral
    }

    #[cfg(test)]
    pub fn last_measurement(&self) -> Option<f64> {
        self.last_measurement
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.output_limits.0, self.output_limits.1)
    }
}

fn limits_for(setpoint: f64) -> (f64, f64) {
    (0.0, setpoint + OUTPUT_HEADROOM)
}
