use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use rand::Rng;
use thiserror::Error;

/// Temperature outside this range is treated as a sensor fault.
pub const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 125.0);
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("sensor bus error: {0}")]
    Bus(String),
    #[error("sensor checksum mismatch")]
    Crc,
    #[error("implausible reading: {temperature:.1}C {humidity:.1}%")]
    OutOfRange { temperature: f64, humidity: f64 },
    #[error("sensor read timed out")]
    Timeout,
    #[error("previous sensor read still in progress")]
    Busy,
}

pub trait Sensor: Send {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

impl Reading {
    /// Rejects values a working sensor cannot produce.
    pub fn validate(self) -> Result<Reading, SensorError> {
        let plausible = self.temperature.is_finite()
            && self.humidity.is_finite()
            && (TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(&self.temperature)
            && (HUMIDITY_RANGE.0..=HUMIDITY_RANGE.1).contains(&self.humidity);
        if plausible {
            Ok(self)
        } else {
            Err(SensorError::OutOfRange {
                temperature: self.temperature,
                humidity: self.humidity,
            })
        }
    }
}

// Randomized stand-in used when no hardware is attached.
pub struct SimulatedSensor;

impl Sensor for SimulatedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let mut rng = rand::thread_rng();
        Ok(Reading {
            temperature: rng.gen_range(8..25) as f64,
            humidity: rng.gen_range(45..100) as f64,
        })
    }
}

pub const SHT4X_DEFAULT_ADDRESS: u8 = 0x44;

const CMD_MEASURE_HIGH_PRECISION: u8 = 0xFD;
const CMD_READ_SERIAL: u8 = 0x89;
const MEASURE_DELAY_MS: u32 = 10;
const SERIAL_DELAY_MS: u32 = 1;

/// Sensirion SHT4x temperature/humidity sensor over I2C.
pub struct Sht4x<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Sht4x<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self { i2c, delay, address }
    }

    /// Reads the factory serial number. Used at startup to prove the device answers.
    pub fn serial_number(&mut self) -> Result<u32, SensorError> {
        let words = self.command(CMD_READ_SERIAL, SERIAL_DELAY_MS)?;
        Ok(((words[0] as u32) << 16) | words[1] as u32)
    }

    pub fn measure(&mut self) -> Result<Reading, SensorError> {
        let words = self.command(CMD_MEASURE_HIGH_PRECISION, MEASURE_DELAY_MS)?;
        Ok(convert(words[0], words[1]))
    }

    fn command(&mut self, cmd: u8, wait_ms: u32) -> Result<[u16; 2], SensorError> {
        self.i2c
            .write(self.address, &[cmd])
            .map_err(|e| SensorError::Bus(format!("{:?}", e)))?;
        self.delay.delay_ms(wait_ms);
        let mut buf = [0u8; 6];
        self.i2c
            .read(self.address, &mut buf)
            .map_err(|e| SensorError::Bus(format!("{:?}", e)))?;
        if crc8(&buf[0..2]) != buf[2] || crc8(&buf[3..5]) != buf[5] {
            return Err(SensorError::Crc);
        }
        Ok([
            u16::from_be_bytes([buf[0], buf[1]]),
            u16::from_be_bytes([buf[3], buf[4]]),
        ])
    }
}

impl<I, D> Sensor for Sht4x<I, D>
where
    I: I2c + Send,
    D: DelayNs + Send,
{
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.measure()?.validate()
    }
}

fn convert(raw_t: u16, raw_rh: u16) -> Reading {
    let temperature = -45.0 + 175.0 * raw_t as f64 / 65535.0;
    let humidity = (-6.0 + 125.0 * raw_rh as f64 / 65535.0).clamp(0.0, 100.0);
    Reading { temperature, humidity }
}

// CRC-8, polynomial 0x31, init 0xFF.
fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    struct MockBus {
        response: [u8; 6],
        written: Vec<u8>,
        fail: bool,
    }

    impl ErrorType for MockBus {
        type Error = ErrorKind;
    }

    impl I2c for MockBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, SHT4X_DEFAULT_ADDRESS);
            if self.fail {
                return Err(ErrorKind::Other);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.written.extend_from_slice(bytes),
                    Operation::Read(buf) => buf.copy_from_slice(&self.response[..buf.len()]),
                }
            }
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn frame(t: u16, rh: u16) -> [u8; 6] {
        let t = t.to_be_bytes();
        let rh = rh.to_be_bytes();
        [t[0], t[1], crc8(&t), rh[0], rh[1], crc8(&rh)]
    }

    fn sensor(response: [u8; 6]) -> Sht4x<MockBus, NoDelay> {
        let bus = MockBus { response, written: Vec::new(), fail: false };
        Sht4x::new(bus, NoDelay, SHT4X_DEFAULT_ADDRESS)
    }

    #[test]
    fn crc_matches_datasheet_example() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn measure_converts_raw_words() {
        // 0x6666 is 40% of full scale: -45 + 175 * 0.4 = 25C, -6 + 125 * 0.4 = 44%
        let mut s = sensor(frame(0x6666, 0x6666));
        let reading = s.read().unwrap();
        assert!((reading.temperature - 25.0).abs() < 0.01);
        assert!((reading.humidity - 44.0).abs() < 0.01);
        assert_eq!(s.i2c.written, vec![CMD_MEASURE_HIGH_PRECISION]);
    }

    #[test]
    fn humidity_is_clamped() {
        let mut s = sensor(frame(0x6666, 0xFFFF));
        assert_eq!(s.read().unwrap().humidity, 100.0);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let mut response = frame(0x6666, 0x6666);
        response[2] ^= 0xFF;
        let mut s = sensor(response);
        assert_eq!(s.read(), Err(SensorError::Crc));
    }

    #[test]
    fn bus_failure_is_reported() {
        let mut s = sensor(frame(0, 0));
        s.i2c.fail = true;
        assert!(matches!(s.read(), Err(SensorError::Bus(_))));
    }

    #[test]
    fn serial_number_joins_words() {
        let mut s = sensor(frame(0x1234, 0x5678));
        assert_eq!(s.serial_number().unwrap(), 0x1234_5678);
        assert_eq!(s.i2c.written, vec![CMD_READ_SERIAL]);
    }

    #[test]
    fn implausible_values_fail_validation() {
        let hot = Reading { temperature: 200.0, humidity: 50.0 };
        assert!(matches!(hot.validate(), Err(SensorError::OutOfRange { .. })));
        let nan = Reading { temperature: f64::NAN, humidity: 50.0 };
        assert!(nan.validate().is_err());
        let fine = Reading { temperature: 18.5, humidity: 60.0 };
        assert_eq!(fine.validate(), Ok(fine));
    }

    #[test]
    fn simulated_sensor_stays_in_range() {
        let mut s = SimulatedSensor;
        for _ in 0..100 {
            let r = s.read().unwrap();
            assert!((8.0..25.0).contains(&r.temperature));
            assert!((45.0..100.0).contains(&r.humidity));
        }
    }
}
