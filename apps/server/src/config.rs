use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Dashboard control ranges (degrees C).
pub const LOW_TARGET_RANGE: (f64, f64) = (12.0, 19.0);
pub const HIGH_TARGET_RANGE: (f64, f64) = (16.0, 22.0);

/// Shortest accepted sampling period.
pub const MIN_TICK_PERIOD: Duration = Duration::from_secs(1);
/// Upper bound on retained samples (about 23 days at 2 s).
pub const MAX_HISTORY_LEN: usize = 1_000_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub thermostat: ThermostatConfig,
    pub heating: HeatingConfig,
    pub boiler: BoilerConfig,
    pub sensor: SensorConfig,
    pub actuator: ActuatorConfig,
    pub journal: JournalConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub interval_minutes: f64,
    pub history_days: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { interval_minutes: 0.25, history_days: 2.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThermostatConfig {
    pub low_target: f64,
    pub high_target: f64,
    pub schedule_start: f64,
    pub schedule_end: f64,
    /// Half-width of the band around the target inside which the heating
    /// demand keeps its previous value. Zero only holds on exact equality.
    pub deadband: f64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            low_target: 16.0,
            high_target: 19.0,
            schedule_start: 6.5,
            schedule_end: 20.5,
            deadband: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CentralHeatingPolicy {
    /// Heating demand is reported but the central-heating channel is never driven.
    #[default]
    StatusOnly,
    /// The central-heating channel follows heating demand or the manual override.
    Automatic,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeatingConfig {
    pub central_heating: CentralHeatingPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoilerConfig {
    /// Litres of fuel burnt per sample interval while the boiler runs.
    pub consumption_per_sample: f64,
    pub on_angle: u16,
}

impl Default for BoilerConfig {
    fn default() -> Self {
        Self { consumption_per_sample: 0.05, on_angle: 179 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorBackend {
    #[default]
    Simulated,
    Sht4x,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    pub backend: SensorBackend,
    pub i2c_bus: PathBuf,
    pub address: u8,
    pub timeout_secs: f64,
    pub stale_after: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Simulated,
            i2c_bus: PathBuf::from("/dev/i2c-1"),
            address: heating_io::sensor::SHT4X_DEFAULT_ADDRESS,
            timeout_secs: 5.0,
            stale_after: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActuatorBackend {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActuatorConfig {
    pub backend: ActuatorBackend,
    pub grid_frequency_hz: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self { backend: ActuatorBackend::Simulated, grid_frequency_hz: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JournalConfig {
    pub directory: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from("logs") }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebConfig {
    pub bind: String,
    pub dashboard_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8888".to_string(),
            dashboard_dir: PathBuf::from("dashboard"),
        }
    }
}

impl Config {
    /// Reads the configuration file. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            info!(path = %path.display(), "no configuration file, using defaults");
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Config::parse(&text).with_context(|| format!("in {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.sampling;
        if !(s.interval_minutes.is_finite() && s.interval_minutes > 0.0) {
            bail!("sampling.interval_minutes must be positive, got {}", s.interval_minutes);
        }
        if !(s.history_days.is_finite() && s.history_days > 0.0) {
            bail!("sampling.history_days must be positive, got {}", s.history_days);
        }
        if s.interval_minutes * 60.0 < MIN_TICK_PERIOD.as_secs_f64() {
            bail!(
                "sampling.interval_minutes gives a period under {:?}, got {}",
                MIN_TICK_PERIOD,
                s.interval_minutes
            );
        }
        let len = self.history_len();
        if len < 1 {
            bail!(
                "history of {} days holds no {} minute sample",
                s.history_days,
                s.interval_minutes
            );
        }
        if len > MAX_HISTORY_LEN {
            bail!("history of {} samples exceeds the limit of {}", len, MAX_HISTORY_LEN);
        }
        let t = &self.thermostat;
        check_range("thermostat.low_target", t.low_target, LOW_TARGET_RANGE)?;
        check_range("thermostat.high_target", t.high_target, HIGH_TARGET_RANGE)?;
        check_schedule(t.schedule_start, t.schedule_end)?;
        if !(t.deadband.is_finite() && t.deadband >= 0.0) {
            bail!("thermostat.deadband must not be negative, got {}", t.deadband);
        }
        let b = &self.boiler;
        if !(b.consumption_per_sample.is_finite() && b.consumption_per_sample >= 0.0) {
            bail!("boiler.consumption_per_sample must not be negative");
        }
        if b.on_angle == 0 || b.on_angle > heating_io::actuator::MAX_PHASE_ANGLE {
            bail!("boiler.on_angle must be within 1..=359, got {}", b.on_angle);
        }
        if !(self.sensor.timeout_secs.is_finite() && self.sensor.timeout_secs > 0.0) {
            bail!("sensor.timeout_secs must be positive");
        }
        Ok(())
    }

    /// Samples retained: `history_days * 24 * 60 / interval_minutes`, rounded down.
    pub fn history_len(&self) -> usize {
        (self.sampling.history_days * 24.0 * 60.0 / self.sampling.interval_minutes).floor() as usize
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.sampling.interval_minutes * 60.0)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.sensor.timeout_secs)
    }
}

pub fn check_range(name: &str, value: f64, (min, max): (f64, f64)) -> Result<()> {
    if !(value.is_finite() && (min..=max).contains(&value)) {
        bail!("{} must be within {}..={}, got {}", name, min, max, value);
    }
    Ok(())
}

pub fn check_schedule(start_hour: f64, end_hour: f64) -> Result<()> {
    check_range("schedule start", start_hour, (0.0, 24.0))?;
    check_range("schedule end", end_hour, (0.0, 24.0))?;
    if start_hour >= end_hour {
        bail!("schedule must start before it ends ({} >= {})", start_hour, end_hour);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        // Two days of 15 second samples.
        assert_eq!(config.history_len(), 11520);
        assert_eq!(config.tick_period(), Duration::from_secs(15));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [sampling]
            interval_minutes = 5.0

            [heating]
            central_heating = "automatic"

            [sensor]
            backend = "sht4x"
            address = 0x45
            "#,
        )
        .unwrap();
        assert_eq!(config.sampling.interval_minutes, 5.0);
        assert_eq!(config.sampling.history_days, 2.0);
        assert_eq!(config.heating.central_heating, CentralHeatingPolicy::Automatic);
        assert_eq!(config.sensor.backend, SensorBackend::Sht4x);
        assert_eq!(config.sensor.address, 0x45);
        assert_eq!(config.history_len(), 576);
    }

    #[test]
    fn history_len_rounds_down_to_at_least_one() {
        let config =
            Config::parse("[sampling]\ninterval_minutes = 1000.0\nhistory_days = 1.0\n").unwrap();
        assert_eq!(config.history_len(), 1);
        let empty = Config::parse("[sampling]\ninterval_minutes = 2000.0\nhistory_days = 1.0\n");
        assert!(empty.is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::parse("[sampling]\ninterval_minutes = 0.0\n").is_err());
        assert!(Config::parse("[thermostat]\nschedule_start = 21.0\n").is_err());
        assert!(Config::parse("[thermostat]\nlow_target = 30.0\n").is_err());
        assert!(Config::parse("[thermostat]\ndeadband = -0.5\n").is_err());
        assert!(Config::parse("[boiler]\non_angle = 400\n").is_err());
        assert!(Config::parse("[unknown]\nx = 1\n").is_err());
    }

    #[test]
    fn rejects_periods_that_cannot_drive_a_timer() {
        let err = Config::parse("[sampling]\ninterval_minutes = 1e-12\nhistory_days = 1e-12\n");
        assert!(err.is_err());
        // Half a second is still under the floor; one second is fine.
        assert!(Config::parse("[sampling]\ninterval_minutes = 0.008\n").is_err());
        let config =
            Config::parse("[sampling]\ninterval_minutes = 0.0166667\nhistory_days = 1.0\n")
                .unwrap();
        assert!(config.tick_period() >= MIN_TICK_PERIOD);
    }

    #[test]
    fn rejects_histories_too_large_to_hold() {
        assert!(Config::parse("[sampling]\nhistory_days = 1e6\n").is_err());
        assert!(Config::parse("[sampling]\nhistory_days = 1e300\n").is_err());
        // Default 15 s sampling: 173 days fits, 174 does not.
        assert!(Config::parse("[sampling]\nhistory_days = 173.0\n").is_ok());
        assert!(Config::parse("[sampling]\nhistory_days = 174.0\n").is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = Config::load(Path::new("/nonexistent/heating.toml")).unwrap();
        assert_eq!(config.journal.directory, PathBuf::from("logs"));
    }
}
