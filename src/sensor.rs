/// SenseAir S8 sensor facade
///
/// One method per sensor attribute or command. Each call is one round trip
/// through the request engine, except the 32-bit identifiers which read the
/// high word and then the low word. Every successful query is also recorded
/// in a [`SensorSnapshot`].

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SensorConfig;
use crate::engine::RequestEngine;
use crate::error::{SensorError, SensorResult};
use crate::protocol::data_utils::{firmware_version_string, register_to_i16, registers_to_u32};
use crate::registers::{
    pwm_to_ppm, validate_abc_period, Acknowledgement, Register, SpecialCommand,
    DEFAULT_PWM_FULL_SCALE_PPM,
};
use crate::transport::{Clock, SensorPort, SerialTransport, SystemClock, TransportStats};
use crate::utils::PerformanceMetrics;
use crate::DEFAULT_TIMEOUT_MS;

/// Last known value of every attribute the facade can query
///
/// A field is `None` until its first successful query and keeps its value
/// when a later query fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub firmware_version: Option<String>,
    pub sensor_type_id: Option<u32>,
    pub sensor_id: Option<u32>,
    pub memory_map_version: Option<i16>,
    pub abc_period_hours: Option<u16>,
    pub acknowledgement: Option<u16>,
    pub meter_status: Option<u16>,
    pub alarm_status: Option<u16>,
    pub output_status: Option<u16>,
    pub co2_ppm: Option<i16>,
    pub pwm_output: Option<i16>,
}

/// S8 sensor on an owned port
pub struct S8Sensor<P: SensorPort, C: Clock = SystemClock> {
    port: P,
    engine: RequestEngine<C>,
    snapshot: SensorSnapshot,
    pwm_full_scale_ppm: f64,
}

impl<P: SensorPort> S8Sensor<P, SystemClock> {
    /// Sensor on the wall clock with the default 5 second deadline
    pub fn new(port: P) -> SensorResult<Self> {
        Ok(Self::with_engine(port, RequestEngine::with_timeout(DEFAULT_TIMEOUT_MS)?))
    }

    /// Sensor on `port` with timeout, packet logging and full scale from `config`
    pub fn with_config(port: P, config: &SensorConfig) -> SensorResult<Self> {
        config.validate()?;
        let mut engine = RequestEngine::with_timeout(config.timeout_ms)?;
        engine.set_packet_logging(config.packet_logging);

        let mut sensor = Self::with_engine(port, engine);
        sensor.set_pwm_full_scale(config.pwm_full_scale_ppm)?;
        Ok(sensor)
    }
}

impl S8Sensor<SerialTransport, SystemClock> {
    /// Open the configured serial port and apply the engine settings
    pub fn from_config(config: &SensorConfig) -> SensorResult<Self> {
        let port = SerialTransport::from_config(config)?;
        Self::with_config(port, config)
    }
}

impl<P: SensorPort, C: Clock> S8Sensor<P, C> {
    pub fn with_engine(port: P, engine: RequestEngine<C>) -> Self {
        Self {
            port,
            engine,
            snapshot: SensorSnapshot::default(),
            pwm_full_scale_ppm: DEFAULT_PWM_FULL_SCALE_PPM,
        }
    }

    /// Full scale of the analog output (2000 ppm standard, 10000 ppm extended)
    pub fn set_pwm_full_scale(&mut self, full_scale_ppm: f64) -> SensorResult<()> {
        if full_scale_ppm.is_nan() || full_scale_ppm <= 0.0 {
            return Err(SensorError::invalid_precondition(format!(
                "PWM full scale must be positive, got {}",
                full_scale_ppm
            )));
        }
        self.pwm_full_scale_ppm = full_scale_ppm;
        Ok(())
    }

    pub fn pwm_full_scale(&self) -> f64 {
        self.pwm_full_scale_ppm
    }

    fn read(&mut self, register: Register) -> SensorResult<u16> {
        self.engine.read_register(&mut self.port, register)
    }

    fn write(&mut self, register: Register, value: u16) -> SensorResult<()> {
        self.engine.write_register(&mut self.port, register, value)
    }

    fn read_u32(&mut self, high: Register, low: Register) -> SensorResult<u32> {
        let high_word = self.read(high)?;
        let low_word = self.read(low)?;
        Ok(registers_to_u32(high_word, low_word))
    }

    /// Firmware version as "major.minor"
    pub fn get_firmware_version(&mut self) -> SensorResult<String> {
        let version = firmware_version_string(self.read(Register::FirmwareVersion)?);
        info!("Firmware version: {}", version);
        self.snapshot.firmware_version = Some(version.clone());
        Ok(version)
    }

    /// CO2 concentration in ppm
    pub fn get_co2(&mut self) -> SensorResult<i16> {
        let co2 = register_to_i16(self.read(Register::Co2)?);
        info!("CO2: {} ppm", co2);
        self.snapshot.co2_ppm = Some(co2);
        Ok(co2)
    }

    /// ABC period in hours; `0` means ABC is disabled
    pub fn get_abc_period(&mut self) -> SensorResult<u16> {
        let hours = self.read(Register::AbcPeriod)?;
        info!("ABC period: {} hours", hours);
        self.snapshot.abc_period_hours = Some(hours);
        Ok(hours)
    }

    /// Set the ABC period; values above 4800 hours never reach the wire
    pub fn set_abc_period(&mut self, hours: u16) -> SensorResult<()> {
        validate_abc_period(hours)?;
        self.write(Register::AbcPeriod, hours)?;
        info!("ABC period set to {} hours", hours);
        self.snapshot.abc_period_hours = Some(hours);
        Ok(())
    }

    pub fn get_acknowledgement(&mut self) -> SensorResult<u16> {
        let flags = self.read(Register::Acknowledgement)?;
        self.snapshot.acknowledgement = Some(flags);
        Ok(flags)
    }

    pub fn clear_acknowledgement(&mut self) -> SensorResult<()> {
        self.write(Register::Acknowledgement, 0x0000)?;
        self.snapshot.acknowledgement = Some(0);
        Ok(())
    }

    pub fn send_special_command(&mut self, command: SpecialCommand) -> SensorResult<()> {
        self.write(Register::SpecialCommand, command.value())?;
        info!("Special command 0x{:04X} accepted", command.value());
        Ok(())
    }

    /// Start a background calibration
    ///
    /// The sensor must already sit in fresh outdoor air. Completion is
    /// observed by polling [`Self::is_background_calibration_done`].
    pub fn start_manual_calibration(&mut self) -> SensorResult<()> {
        self.clear_acknowledgement()?;
        self.send_special_command(SpecialCommand::BackgroundCalibration)
    }

    /// One acknowledgement read, tested against the background calibration bit
    pub fn is_background_calibration_done(&mut self) -> SensorResult<bool> {
        let flags = self.get_acknowledgement()?;
        Ok(Acknowledgement(flags).background_calibration_done())
    }

    pub fn get_meter_status(&mut self) -> SensorResult<u16> {
        let status = self.read(Register::MeterStatus)?;
        self.snapshot.meter_status = Some(status);
        Ok(status)
    }

    pub fn get_alarm_status(&mut self) -> SensorResult<u16> {
        let status = self.read(Register::AlarmStatus)?;
        self.snapshot.alarm_status = Some(status);
        Ok(status)
    }

    pub fn get_output_status(&mut self) -> SensorResult<u16> {
        let status = self.read(Register::OutputStatus)?;
        self.snapshot.output_status = Some(status);
        Ok(status)
    }

    /// Raw PWM output, 0x3FFF = 100% duty cycle
    pub fn get_pwm_output(&mut self) -> SensorResult<i16> {
        let raw = register_to_i16(self.read(Register::PwmOutput)?);
        self.snapshot.pwm_output = Some(raw);
        Ok(raw)
    }

    /// PWM output converted with the configured full scale
    pub fn get_pwm_output_ppm(&mut self) -> SensorResult<f64> {
        let raw = self.get_pwm_output()?;
        Ok(pwm_to_ppm(raw, self.pwm_full_scale_ppm))
    }

    /// Sensor type ID, high word read first
    pub fn get_sensor_type_id(&mut self) -> SensorResult<u32> {
        let id = self.read_u32(Register::SensorTypeIdHigh, Register::SensorTypeIdLow)?;
        info!("Sensor type ID: 0x{:08X}", id);
        self.snapshot.sensor_type_id = Some(id);
        Ok(id)
    }

    /// Sensor serial number, high word read first
    pub fn get_sensor_id(&mut self) -> SensorResult<u32> {
        let id = self.read_u32(Register::SensorIdHigh, Register::SensorIdLow)?;
        info!("Sensor ID: 0x{:08X}", id);
        self.snapshot.sensor_id = Some(id);
        Ok(id)
    }

    pub fn get_memory_map_version(&mut self) -> SensorResult<i16> {
        let version = register_to_i16(self.read(Register::MemoryMapVersion)?);
        self.snapshot.memory_map_version = Some(version);
        Ok(version)
    }

    /// Query firmware, type ID, sensor ID and memory map version
    ///
    /// Stops at the first failure; values read before it stay in the snapshot.
    pub fn read_identity(&mut self) -> SensorResult<&SensorSnapshot> {
        self.get_firmware_version()?;
        self.get_sensor_type_id()?;
        self.get_sensor_id()?;
        self.get_memory_map_version()?;
        Ok(&self.snapshot)
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }

    pub fn stats(&self) -> &TransportStats {
        self.engine.stats()
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        self.engine.metrics()
    }

    pub fn engine(&self) -> &RequestEngine<C> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RequestEngine<C> {
        &mut self.engine
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give the port back to the caller
    pub fn into_inner(self) -> P {
        self.port
    }
}
