pub mod accounting;
pub mod config;
pub mod controller;
pub mod history;
pub mod pid;
pub mod schedule;
pub mod thermostat;
pub mod web;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::RwLock;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ActuatorBackend, Config, SensorBackend};
use crate::controller::Controller;
use crate::web::{create_web_server, AppState};
use heating_io::actuator::{Actuator, SimulatedActuator};
use heating_io::sensor::{Reading, Sensor, SensorError, Sht4x, SimulatedSensor};

#[derive(Parser, Debug)]
#[command(name = "heating-server", about = "Boiler thermostat with a JSON status interface")]
struct Args {
    /// TOML configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "heating.toml")]
    config: PathBuf,
}

type SharedSensor = Arc<Mutex<Box<dyn Sensor>>>;

fn open_sensor(config: &Config) -> Result<Box<dyn Sensor>> {
    match config.sensor.backend {
        SensorBackend::Simulated => {
            info!("using simulated sensor");
            Ok(Box::new(SimulatedSensor))
        }
        SensorBackend::Sht4x => {
            let bus = &config.sensor.i2c_bus;
            let i2c = linux_embedded_hal::I2cdev::new(bus)
                .with_context(|| format!("opening I2C bus {}", bus.display()))?;
            let mut sensor = Sht4x::new(i2c, linux_embedded_hal::Delay, config.sensor.address);
            let serial = sensor.serial_number().with_context(|| {
                format!("probing SHT4x at {:#04x} on {}", config.sensor.address, bus.display())
            })?;
            info!("SHT4x sensor found, serial {:08x}", serial);
            Ok(Box::new(sensor))
        }
    }
}

fn open_actuator(config: &Config) -> Box<dyn Actuator> {
    match config.actuator.backend {
        ActuatorBackend::Simulated => {
            info!("using simulated actuator");
            Box::new(SimulatedActuator::new())
        }
    }
}

/// Reads the sensor off the runtime thread. A read still hung from an
/// earlier tick holds the lock, so this one reports busy instead of queueing.
async fn read_sensor(sensor: &SharedSensor, limit: Duration) -> Result<Reading, SensorError> {
    let sensor = sensor.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut sensor = match sensor.try_lock() {
            Ok(sensor) => sensor,
            Err(TryLockError::WouldBlock) => return Err(SensorError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("an earlier sensor read panicked, reusing the sensor");
                poisoned.into_inner()
            }
        };
        sensor.read()
    });
    match timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(SensorError::Bus(format!("sensor task failed: {}", e))),
        Err(_) => Err(SensorError::Timeout),
    }
}

/// SIGINT and SIGTERM listeners. They live as long as the loop, so a signal
/// arriving while a tick runs stays pending until the next poll.
struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("installing SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let sensor: SharedSensor = Arc::new(Mutex::new(open_sensor(&config)?));
    let controller = Controller::start(&config, open_actuator(&config), Local::now())?;
    let controller = Arc::new(RwLock::new(controller));

    let web_state = AppState {
        controller: controller.clone(),
        dashboard_dir: config.web.dashboard_dir.clone(),
    };
    let bind = config.web.bind.clone();
    tokio::spawn(async move {
        if let Err(e) = create_web_server(web_state, &bind).await {
            error!(error = %e, "web server stopped");
        }
    });

    let mut ticker = interval(config.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals = ShutdownSignals::install()?;
    info!(period_secs = config.tick_period().as_secs_f64(), "control loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reading = read_sensor(&sensor, config.sensor_timeout()).await;
                controller.write().await.tick(Local::now(), reading);
            }
            name = signals.recv() => {
                info!(signal = name, "stopping");
                break;
            }
        }
    }

    controller.write().await.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const READING: Reading = Reading { temperature: 20.0, humidity: 50.0 };

    // Blocks until the test drops the sender.
    struct Stuck(mpsc::Receiver<()>);

    impl Sensor for Stuck {
        fn read(&mut self) -> Result<Reading, SensorError> {
            let _ = self.0.recv();
            Ok(READING)
        }
    }

    struct PanicsOnce {
        panicked: bool,
    }

    impl Sensor for PanicsOnce {
        fn read(&mut self) -> Result<Reading, SensorError> {
            if !self.panicked {
                self.panicked = true;
                panic!("bus wedged");
            }
            Ok(READING)
        }
    }

    fn shared(sensor: impl Sensor + 'static) -> SharedSensor {
        Arc::new(Mutex::new(Box::new(sensor)))
    }

    #[tokio::test]
    async fn hung_read_times_out_then_reports_busy() {
        let (release, rx) = mpsc::channel();
        let sensor = shared(Stuck(rx));
        let limit = Duration::from_millis(50);

        assert_eq!(read_sensor(&sensor, limit).await, Err(SensorError::Timeout));
        assert_eq!(read_sensor(&sensor, limit).await, Err(SensorError::Busy));

        drop(release);
        let mut result = Err(SensorError::Busy);
        for _ in 0..100 {
            result = read_sensor(&sensor, limit).await;
            if result != Err(SensorError::Busy) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(result, Ok(READING));
    }

    #[tokio::test]
    async fn panicking_read_is_a_bus_fault_and_not_permanent() {
        let sensor = shared(PanicsOnce { panicked: false });
        let limit = Duration::from_secs(2);
        assert!(matches!(read_sensor(&sensor, limit).await, Err(SensorError::Bus(_))));
        assert_eq!(read_sensor(&sensor, limit).await, Ok(READING));
    }

    #[tokio::test]
    async fn sigint_during_a_tick_is_kept_for_the_next_poll() -> Result<()> {
        let mut signals = ShutdownSignals::install()?;
        // The tick arm wins and the pending recv is dropped.
        tokio::select! {
            _ = signals.recv() => panic!("no signal was sent"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()?;
        assert!(status.success());

        let name = timeout(Duration::from_secs(2), signals.recv()).await?;
        assert_eq!(name, "SIGINT");
        Ok(())
    }
}
