//! The controller owns every piece of mutable state: history, thermostat,
//! accounting, user settings, the actuator and the journal. One tick runs
//! the whole sample-decide-actuate-record cycle; user inputs are applied
//! between ticks through the setters below.

use crate::accounting::Accounting;
use crate::config::{
    check_range, check_schedule, CentralHeatingPolicy, Config, HIGH_TARGET_RANGE, LOW_TARGET_RANGE,
};
use crate::history::{heating_periods, History, Sample};
use crate::schedule::{select_target, ScheduleWindow};
use crate::thermostat::Thermostat;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Local};
use heating_io::actuator::{Actuator, Channel};
use heating_io::journal::{self, Journal, Record};
use heating_io::sensor::{Reading, SensorError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub low_target: f64,
    pub high_target: f64,
    pub schedule: ScheduleWindow,
    pub hot_water_override: bool,
    pub heating_override: bool,
    pub display_hours: f64,
}

/// Desired versus last successfully applied state of one channel. A failed
/// command leaves `applied` behind, so the next tick tries again.
#[derive(Debug, Clone, Copy)]
struct ChannelDriver {
    channel: Channel,
    desired: bool,
    applied: Option<bool>,
}

impl ChannelDriver {
    fn new(channel: Channel) -> Self {
        // The actuator starts with every channel off.
        Self { channel, desired: false, applied: Some(false) }
    }

    fn apply(&mut self, actuator: &mut dyn Actuator, on_angle: u16) {
        if self.applied == Some(self.desired) {
            return;
        }
        let result = if self.desired {
            actuator.turn_on(self.channel, on_angle)
        } else {
            actuator.turn_off(self.channel)
        };
        match result {
            Ok(()) => self.applied = Some(self.desired),
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    on = self.desired,
                    error = %e,
                    "actuator command failed, retrying next tick"
                );
                self.applied = None;
            }
        }
    }
}

pub struct Controller {
    history: History,
    thermostat: Thermostat,
    accounting: Accounting,
    settings: Settings,
    actuator: Box<dyn Actuator>,
    central_heating: ChannelDriver,
    hot_water: ChannelDriver,
    journal: Journal,
    policy: CentralHeatingPolicy,
    on_angle: u16,
    interval_minutes: f64,
    max_display_hours: f64,
    last_reading: Option<Reading>,
    consecutive_sensor_faults: u32,
    stale_after: u32,
    boiler_on: bool,
    last_tick: Option<DateTime<Local>>,
    shut_down: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub updated_at: Option<i64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub power_signal: f64,
    pub heating_demand: bool,
    pub boiler_on: bool,
    pub active_target: f64,
    pub low_target: f64,
    pub high_target: f64,
    pub schedule: ScheduleWindow,
    pub hot_water_override: bool,
    pub heating_override: bool,
    pub central_heating_policy: CentralHeatingPolicy,
    pub total_runtime_hours: f64,
    pub carried_runtime_hours: f64,
    pub consecutive_sensor_faults: u32,
    pub stale: bool,
    pub log_id: String,
    pub display_hours: f64,
    /// Real samples in the retained history; the rest are placeholders.
    pub samples_recorded: usize,
    pub history: HistorySeries,
    /// Boiler-on stretches within the displayed history, unix seconds.
    pub heating_periods: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistorySeries {
    pub timestamps: Vec<i64>,
    pub temperature: Vec<Option<f64>>,
    pub humidity: Vec<Option<f64>>,
    pub boiler_on: Vec<bool>,
    /// Running fuel total over the whole retained history.
    pub consumption: Vec<f64>,
}

impl Controller {
    /// Recovers the previous run's runtime, initializes the actuator and
    /// opens this run's journal. Only the last two can fail.
    pub fn start(
        config: &Config,
        mut actuator: Box<dyn Actuator>,
        now: DateTime<Local>,
    ) -> Result<Controller> {
        let dir = &config.journal.directory;
        let carried = match journal::recover_runtime(dir) {
            Ok(hours) => {
                info!(hours, "recovered runtime from previous run");
                hours
            }
            Err(e) => {
                error!(error = %e, "cannot recover previous runtime, starting from 0");
                0.0
            }
        };

        actuator
            .initialize(config.actuator.grid_frequency_hz)
            .context("initializing actuator")?;
        info!(grid_hz = config.actuator.grid_frequency_hz, "actuator initialized");

        let journal = Journal::create(dir, now)
            .with_context(|| format!("creating log in {}", dir.display()))?;
        info!(path = %journal.path().display(), "logging run");

        let t = &config.thermostat;
        let schedule = ScheduleWindow { start_hour: t.schedule_start, end_hour: t.schedule_end };
        let initial_target = select_target(&now, schedule, t.low_target, t.high_target);
        let interval_minutes = config.sampling.interval_minutes;
        let max_display_hours = config.sampling.history_days * 24.0;

        Ok(Controller {
            history: History::new(
                config.history_len(),
                now,
                Duration::milliseconds((interval_minutes * 60_000.0) as i64),
            ),
            thermostat: Thermostat::new(initial_target, t.deadband, interval_minutes * 60.0),
            accounting: Accounting::new(carried, config.boiler.consumption_per_sample),
            settings: Settings {
                low_target: t.low_target,
                high_target: t.high_target,
                schedule,
                hot_water_override: false,
                heating_override: false,
                display_hours: max_display_hours,
            },
            actuator,
            central_heating: ChannelDriver::new(Channel::CentralHeating),
            hot_water: ChannelDriver::new(Channel::HotWater),
            journal,
            policy: config.heating.central_heating,
            on_angle: config.boiler.on_angle,
            interval_minutes,
            max_display_hours,
            last_reading: None,
            consecutive_sensor_faults: 0,
            stale_after: config.sensor.stale_after,
            boiler_on: false,
            last_tick: None,
            shut_down: false,
        })
    }

    /// One pass of the control loop at `now` with the outcome of the sensor read.
    pub fn tick(&mut self, now: DateTime<Local>, reading: Result<Reading, SensorError>) {
        let reading = match reading {
            Ok(r) => {
                if self.consecutive_sensor_faults > 0 {
                    info!(faults = self.consecutive_sensor_faults, "sensor recovered");
                }
                self.consecutive_sensor_faults = 0;
                self.last_reading = Some(r);
                Some(r)
            }
            Err(e) => {
                self.consecutive_sensor_faults += 1;
                warn!(
                    error = %e,
                    faults = self.consecutive_sensor_faults,
                    "sensor read failed, reusing last reading"
                );
                self.last_reading
            }
        };
        let temperature = reading.map(|r| r.temperature);
        let humidity = reading.map(|r| r.humidity);

        self.history.push(Sample { timestamp: now, temperature, humidity, boiler_on: false });

        let s = &self.settings;
        let target = select_target(&now, s.schedule, s.low_target, s.high_target);
        if let Some(t) = temperature {
            self.thermostat.update_pid(t, target);
        }
        let demand = self.thermostat.update_demand();

        let boiler_on = demand || self.settings.hot_water_override || self.central_heating_forced();
        self.history.mark_newest_boiler_on(boiler_on);
        self.accounting.accumulate(boiler_on, self.interval_minutes);
        self.boiler_on = boiler_on;

        let record = Record {
            timestamp: now.naive_local(),
            temperature,
            humidity,
            runtime_hours: self.accounting.total_runtime(),
        };
        if let Err(e) = self.journal.append(&record) {
            error!(error = %e, "failed to write log record, skipping");
        }

        self.drive_channels();
        self.last_tick = Some(now);
        debug!(
            temperature = ?temperature,
            setpoint = self.thermostat.active_target(),
            power = self.thermostat.power_signal(),
            demand,
            boiler_on,
            "tick"
        );
    }

    fn central_heating_forced(&self) -> bool {
        self.policy == CentralHeatingPolicy::Automatic && self.settings.heating_override
    }

    fn drive_channels(&mut self) {
        self.hot_water.desired = self.settings.hot_water_override;
        self.hot_water.apply(self.actuator.as_mut(), self.on_angle);
        if self.policy == CentralHeatingPolicy::Automatic {
            self.central_heating.desired =
                self.thermostat.heating_demand() || self.settings.heating_override;
            self.central_heating.apply(self.actuator.as_mut(), self.on_angle);
        }
    }

    pub fn set_targets(&mut self, low: Option<f64>, high: Option<f64>) -> Result<()> {
        if let Some(low) = low {
            check_range("low target", low, LOW_TARGET_RANGE)?;
        }
        if let Some(high) = high {
            check_range("high target", high, HIGH_TARGET_RANGE)?;
        }
        if let Some(low) = low {
            self.settings.low_target = low;
        }
        if let Some(high) = high {
            self.settings.high_target = high;
        }
        info!(low = self.settings.low_target, high = self.settings.high_target, "targets updated");
        Ok(())
    }

    pub fn set_schedule(&mut self, start_hour: f64, end_hour: f64) -> Result<()> {
        check_schedule(start_hour, end_hour)?;
        self.settings.schedule = ScheduleWindow { start_hour, end_hour };
        info!(start_hour, end_hour, "schedule updated");
        Ok(())
    }

    /// Switches the hot-water channel right away rather than at the next tick.
    pub fn set_hot_water(&mut self, on: bool) {
        info!(on, "hot water override");
        self.settings.hot_water_override = on;
        self.hot_water.desired = on;
        self.hot_water.apply(self.actuator.as_mut(), self.on_angle);
    }

    pub fn set_heating_override(&mut self, on: bool) {
        info!(on, policy = ?self.policy, "heating override");
        self.settings.heating_override = on;
    }

    pub fn set_display_hours(&mut self, hours: f64) -> Result<()> {
        if !(hours.is_finite() && hours > 0.0 && hours <= self.max_display_hours) {
            bail!(
                "display window must be within (0, {}] hours, got {}",
                self.max_display_hours,
                hours
            );
        }
        self.settings.display_hours = hours;
        Ok(())
    }

    #[cfg(test)]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[cfg(test)]
    pub fn history(&self) -> &History {
        &self.history
    }

    #[cfg(test)]
    pub fn thermostat(&self) -> &Thermostat {
        &self.thermostat
    }

    #[cfg(test)]
    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    pub fn is_stale(&self) -> bool {
        self.consecutive_sensor_faults >= self.stale_after.max(1)
    }

    /// Read-only view for the presentation layer. History is limited to the
    /// display window and, when `since` is given, to samples newer than it.
    pub fn snapshot(&self, since: Option<i64>) -> Snapshot {
        let samples: Vec<Sample> = self.history.samples().collect();
        let consumption = self
            .accounting
            .estimated_consumption(&samples.iter().map(|s| s.boiler_on).collect::<Vec<_>>());

        let newest = samples.last().map(|s| s.timestamp);
        let window = Duration::seconds((self.settings.display_hours * 3600.0) as i64);
        let window_start = newest.map(|t| t - window);
        let keep = |s: &Sample| {
            window_start.map_or(true, |start| s.timestamp > start)
                && since.map_or(true, |since| s.timestamp.timestamp() > since)
        };

        let mut series = HistorySeries::default();
        let mut shown = Vec::new();
        for (s, total) in samples.iter().zip(consumption) {
            if !keep(s) {
                continue;
            }
            series.timestamps.push(s.timestamp.timestamp());
            series.temperature.push(s.temperature);
            series.humidity.push(s.humidity);
            series.boiler_on.push(s.boiler_on);
            series.consumption.push(total);
            shown.push(*s);
        }

        let newest_sample = self.history.newest();
        Snapshot {
            updated_at: self.last_tick.map(|t| t.timestamp()),
            temperature: newest_sample.and_then(|s| s.temperature),
            humidity: newest_sample.and_then(|s| s.humidity),
            power_signal: self.thermostat.power_signal(),
            heating_demand: self.thermostat.heating_demand(),
            boiler_on: self.boiler_on,
            active_target: self.thermostat.active_target(),
            low_target: self.settings.low_target,
            high_target: self.settings.high_target,
            schedule: self.settings.schedule,
            hot_water_override: self.settings.hot_water_override,
            heating_override: self.settings.heating_override,
            central_heating_policy: self.policy,
            total_runtime_hours: self.accounting.total_runtime(),
            carried_runtime_hours: self.accounting.carried_runtime_hours(),
            consecutive_sensor_faults: self.consecutive_sensor_faults,
            stale: self.is_stale(),
            log_id: self.journal.id().to_string(),
            display_hours: self.settings.display_hours,
            samples_recorded: self.history.filled(),
            history: series,
            heating_periods: heating_periods(&shown)
                .into_iter()
                .map(|(a, b)| (a.timestamp(), b.timestamp()))
                .collect(),
        }
    }

    /// Forces every channel off and syncs the journal. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("shutting down, turning all channels off");
        if let Err(e) = self.actuator.all_off() {
            error!(error = %e, "failed to turn all channels off");
        }
        if let Err(e) = self.journal.sync() {
            error!(error = %e, "failed to sync log");
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
