//! # SenseAir S8 - Modbus-RTU Protocol Engine for the S8 CO2 Sensor
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! Query and configure a SenseAir S8 NDIR CO2 sensor over its half-duplex
//! UART. The sensor speaks a small subset of Modbus RTU: every request is an
//! 8-byte frame to the "any address" marker `0xFE`, answered by a 7-byte
//! register read response or an echo of a single-register write.
//!
//! ## Features
//!
//! - **Frame codec**: CRC16 (Modbus), request encoding, response validation
//! - **Request engine**: synchronous round trips with an injected clock
//! - **Register map**: typed access to telemetry, calibration and ABC settings
//! - **Explicit results**: a legitimate zero reading is `Ok(0)`, never a failure
//! - **Simulator**: an in-memory S8 for tests and demos without hardware
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Used for |
//! |------|----------|----------|
//! | 0x03 | Read Holding Registers | acknowledgement flags, ABC period |
//! | 0x04 | Read Input Registers | CO2, status, PWM, identity |
//! | 0x06 | Write Single Register | ABC period, calibration commands |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use senseair_s8::{S8Sensor, SensorConfig, SensorResult};
//!
//! fn main() -> SensorResult<()> {
//!     let config = SensorConfig::load(None)?;
//!     let mut sensor = S8Sensor::from_config(&config)?;
//!
//!     println!("Firmware: {}", sensor.get_firmware_version()?);
//!     println!("CO2: {} ppm", sensor.get_co2()?);
//!
//!     // 0 disables automatic background calibration
//!     sensor.set_abc_period(180)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Without Hardware
//!
//! ```rust
//! use senseair_s8::{S8Sensor, SimulatedSensor};
//!
//! let mut sensor = S8Sensor::new(SimulatedSensor::new()).unwrap();
//! assert_eq!(sensor.get_co2().unwrap(), 400);
//! assert_eq!(sensor.get_abc_period().unwrap(), 180);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Application   │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │  Sensor Facade  │───►│  Register Map   │
//! └─────────────────┘    └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Request Engine  │───►│  Frame Codec    │
//! └─────────────────┘    └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Port (serial or │
//! │   simulated)    │
//! └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Frame codec and CRC16
pub mod protocol;

/// Register catalogue and bit masks
pub mod registers;

/// Port and clock abstractions, serial backend
pub mod transport;

/// Round-trip request engine
pub mod engine;

/// Public per-attribute sensor API
pub mod sensor;

/// In-memory sensor for tests and demos
pub mod simulator;

/// Link configuration
pub mod config;

/// Utility functions and performance monitoring
pub mod utils;

/// Callback packet logging
pub mod logging;

// Re-export main types for convenience
pub use config::SensorConfig;
pub use engine::RequestEngine;
pub use error::{SensorError, SensorResult};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use protocol::{crc16, FunctionCode, ResponsePayload};
pub use registers::{Acknowledgement, MeterStatus, OutputStatus, Register, SpecialCommand};
pub use sensor::{S8Sensor, SensorSnapshot};
pub use simulator::{Fault, SimulatedSensor};
pub use transport::{Clock, SensorPort, SerialTransport, SystemClock, TransportStats};
pub use utils::{OperationTimer, PerformanceMetrics};

/// Default response deadline (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Factory UART speed of the S8
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("SenseAir S8 v{} - Modbus-RTU protocol engine for the S8 CO2 sensor", VERSION)
}
