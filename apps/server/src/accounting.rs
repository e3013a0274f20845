/// Boiler runtime and fuel estimate.
#[derive(Debug, Clone)]
pub struct Accounting {
    cumulative_runtime_hours: f64,
    carried_runtime_hours: f64,
    consumption_per_sample: f64,
}

impl Accounting {
    pub fn new(carried_runtime_hours: f64, consumption_per_sample: f64) -> Self {
        Self {
            cumulative_runtime_hours: 0.0,
            carried_runtime_hours,
            consumption_per_sample,
        }
    }

    pub fn accumulate(&mut self, boiler_on: bool, sampling_interval_minutes: f64) {
        if boiler_on {
            self.cumulative_runtime_hours += sampling_interval_minutes / 60.0;
        }
    }

    /// Hours this run plus hours recovered from the previous run.
    pub fn total_runtime(&self) -> f64 {
        self.cumulative_runtime_hours + self.carried_runtime_hours
    }

    #[cfg(test)]
    pub fn cumulative_runtime_hours(&self) -> f64 {
        self.cumulative_runtime_hours
    }

    pub fn carried_runtime_hours(&self) -> f64 {
        self.carried_runtime_hours
    }

    /// Running total of fuel burnt over `boiler_on`, oldest first.
    pub fn estimated_consumption(&self, boiler_on: &[bool]) -> Vec<f64> {
        boiler_on
            .iter()
            .scan(0.0, |total, &on| {
                if on {
                    *total += self.consumption_per_sample;
                }
                Some(*total)
            })
            .collect()
    }
}
