/// S8 register map
///
/// The fixed catalogue of registers the sensor exposes, with their access
/// class, the function code used to read them and the rule that turns the
/// raw word into a value. Addresses are 0-based wire addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SensorError, SensorResult};
use crate::protocol::{FunctionCode, RegisterAddress, RegisterValue};

/// Largest accepted ABC period in hours
pub const ABC_PERIOD_MAX_HOURS: u16 = 4800;

/// Factory ABC period in hours (7.5 days)
pub const DEFAULT_ABC_PERIOD_HOURS: u16 = 180;

/// Raw PWM value that corresponds to 100% duty cycle
pub const PWM_FULL_RANGE: u16 = 0x3FFF;

/// Full scale of the standard 2000 ppm sensor
pub const DEFAULT_PWM_FULL_SCALE_PPM: f64 = 2000.0;

/// Register access class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessClass {
    /// Read-only telemetry
    Input,
    /// Read/write configuration
    Holding,
}

/// How a raw register word is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoding {
    /// Two's complement 16-bit value
    Signed16,
    /// Bit field, read as unsigned
    Bitmask,
    /// Plain unsigned quantity
    Unsigned16,
    /// Major in the high byte, minor in the low byte
    PackedVersion,
    /// High word of a 32-bit value; read before its low word
    HighWord,
    /// Low word of a 32-bit value
    LowWord,
}

/// Named S8 registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    /// IR1
    MeterStatus,
    /// IR2
    AlarmStatus,
    /// IR3
    OutputStatus,
    /// IR4, CO2 in ppm
    Co2,
    /// IR22, 0x3FFF = 100%
    PwmOutput,
    /// IR26
    SensorTypeIdHigh,
    /// IR27
    SensorTypeIdLow,
    /// IR28
    MemoryMapVersion,
    /// IR29, "major.minor"
    FirmwareVersion,
    /// IR30
    SensorIdHigh,
    /// IR31
    SensorIdLow,
    /// HR1
    Acknowledgement,
    /// HR2, write-only in practice
    SpecialCommand,
    /// HR32, hours; 0 disables ABC
    AbcPeriod,
}

/// One row of the register map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub register: Register,
    pub address: RegisterAddress,
    pub access: AccessClass,
    pub decoding: Decoding,
}

impl RegisterSpec {
    /// Function code used to read this register
    pub fn read_function(&self) -> FunctionCode {
        match self.access {
            AccessClass::Input => FunctionCode::ReadInputRegisters,
            AccessClass::Holding => FunctionCode::ReadHoldingRegisters,
        }
    }

    /// Check if the register accepts single-register writes
    pub fn is_writable(&self) -> bool {
        self.access == AccessClass::Holding
    }
}

const fn spec(
    register: Register,
    address: RegisterAddress,
    access: AccessClass,
    decoding: Decoding,
) -> RegisterSpec {
    RegisterSpec { register, address, access, decoding }
}

/// The complete S8 register map
pub static REGISTER_MAP: [RegisterSpec; 14] = [
    spec(Register::MeterStatus, 0x0000, AccessClass::Input, Decoding::Bitmask),
    spec(Register::AlarmStatus, 0x0001, AccessClass::Input, Decoding::Bitmask),
    spec(Register::OutputStatus, 0x0002, AccessClass::Input, Decoding::Bitmask),
    spec(Register::Co2, 0x0003, AccessClass::Input, Decoding::Signed16),
    spec(Register::PwmOutput, 0x0015, AccessClass::Input, Decoding::Signed16),
    spec(Register::SensorTypeIdHigh, 0x0019, AccessClass::Input, Decoding::HighWord),
    spec(Register::SensorTypeIdLow, 0x001A, AccessClass::Input, Decoding::LowWord),
    spec(Register::MemoryMapVersion, 0x001B, AccessClass::Input, Decoding::Signed16),
    spec(Register::FirmwareVersion, 0x001C, AccessClass::Input, Decoding::PackedVersion),
    spec(Register::SensorIdHigh, 0x001D, AccessClass::Input, Decoding::HighWord),
    spec(Register::SensorIdLow, 0x001E, AccessClass::Input, Decoding::LowWord),
    spec(Register::Acknowledgement, 0x0000, AccessClass::Holding, Decoding::Bitmask),
    spec(Register::SpecialCommand, 0x0001, AccessClass::Holding, Decoding::Unsigned16),
    spec(Register::AbcPeriod, 0x0020, AccessClass::Holding, Decoding::Unsigned16),
];

impl Register {
    /// Every register, in map order
    pub const ALL: [Register; 14] = [
        Register::MeterStatus,
        Register::AlarmStatus,
        Register::OutputStatus,
        Register::Co2,
        Register::PwmOutput,
        Register::SensorTypeIdHigh,
        Register::SensorTypeIdLow,
        Register::MemoryMapVersion,
        Register::FirmwareVersion,
        Register::SensorIdHigh,
        Register::SensorIdLow,
        Register::Acknowledgement,
        Register::SpecialCommand,
        Register::AbcPeriod,
    ];

    /// Map entry for this register
    pub fn spec(self) -> &'static RegisterSpec {
        &REGISTER_MAP[self as usize]
    }

    pub fn address(self) -> RegisterAddress {
        self.spec().address
    }

    pub fn access(self) -> AccessClass {
        self.spec().access
    }

    pub fn read_function(self) -> FunctionCode {
        self.spec().read_function()
    }

    pub fn decoding(self) -> Decoding {
        self.spec().decoding
    }

    /// Find the register a function code and address refer to
    pub fn lookup(function: FunctionCode, address: RegisterAddress) -> Option<Register> {
        let access = match function {
            FunctionCode::ReadInputRegisters => AccessClass::Input,
            FunctionCode::ReadHoldingRegisters | FunctionCode::WriteSingleRegister => {
                AccessClass::Holding
            }
        };
        REGISTER_MAP
            .iter()
            .find(|entry| entry.access == access && entry.address == address)
            .map(|entry| entry.register)
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::MeterStatus => "meter status",
            Register::AlarmStatus => "alarm status",
            Register::OutputStatus => "output status",
            Register::Co2 => "CO2",
            Register::PwmOutput => "PWM output",
            Register::SensorTypeIdHigh => "sensor type ID (high)",
            Register::SensorTypeIdLow => "sensor type ID (low)",
            Register::MemoryMapVersion => "memory map version",
            Register::FirmwareVersion => "firmware version",
            Register::SensorIdHigh => "sensor ID (high)",
            Register::SensorIdLow => "sensor ID (low)",
            Register::Acknowledgement => "acknowledgement flags",
            Register::SpecialCommand => "special command",
            Register::AbcPeriod => "ABC period",
        }
    }

    /// Render a raw value the way the register's decoding rule reads it
    pub fn describe_value(self, value: RegisterValue) -> String {
        match self.decoding() {
            Decoding::Signed16 => match self {
                Register::Co2 => format!("{} ppm", value as i16),
                _ => format!("{}", value as i16),
            },
            Decoding::Bitmask => format!("b{:016b}", value),
            Decoding::Unsigned16 => match self {
                Register::AbcPeriod => format!("{} hours", value),
                _ => format!("0x{:04X}", value),
            },
            Decoding::PackedVersion => format!("{}.{}", value >> 8, value & 0x00FF),
            Decoding::HighWord | Decoding::LowWord => format!("0x{:04X}", value),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.access() {
            AccessClass::Input => "IR",
            AccessClass::Holding => "HR",
        };
        write!(f, "{} ({} 0x{:04X})", self.name(), kind, self.address())
    }
}

/// Commands written to the special command register (high byte = command,
/// low byte = parameter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialCommand {
    /// Background calibration against fresh outdoor air (~400 ppm)
    BackgroundCalibration,
    /// Zero calibration against nitrogen
    ZeroCalibration,
}

impl SpecialCommand {
    const COMMAND: u16 = 0x7C00;

    pub fn parameter(self) -> u8 {
        match self {
            SpecialCommand::BackgroundCalibration => 0x06,
            SpecialCommand::ZeroCalibration => 0x07,
        }
    }

    /// Register value to write
    pub fn value(self) -> RegisterValue {
        Self::COMMAND | self.parameter() as u16
    }

    /// Acknowledgement bit the sensor sets once the command completed
    pub fn completion_mask(self) -> u16 {
        match self {
            SpecialCommand::BackgroundCalibration => Acknowledgement::BACKGROUND_CALIBRATION,
            SpecialCommand::ZeroCalibration => Acknowledgement::NITROGEN_CALIBRATION,
        }
    }
}

/// Acknowledgement register (HR1) view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Acknowledgement(pub u16);

impl Acknowledgement {
    pub const BACKGROUND_CALIBRATION: u16 = 0x0020;
    pub const NITROGEN_CALIBRATION: u16 = 0x0040;

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn background_calibration_done(self) -> bool {
        self.0 & Self::BACKGROUND_CALIBRATION != 0
    }

    pub fn nitrogen_calibration_done(self) -> bool {
        self.0 & Self::NITROGEN_CALIBRATION != 0
    }
}

/// Meter status register (IR1) view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeterStatus(pub u16);

impl MeterStatus {
    pub const FATAL_ERROR: u16 = 0x0001;
    pub const OFFSET_REGULATION_ERROR: u16 = 0x0002;
    pub const ALGORITHM_ERROR: u16 = 0x0004;
    pub const OUTPUT_ERROR: u16 = 0x0008;
    pub const SELF_DIAGNOSTICS_ERROR: u16 = 0x0010;
    pub const OUT_OF_RANGE: u16 = 0x0020;
    pub const MEMORY_ERROR: u16 = 0x0040;
    pub const ANY_ERROR: u16 = 0x007F;

    const DESCRIPTIONS: [(u16, &'static str); 7] = [
        (Self::FATAL_ERROR, "fatal error"),
        (Self::OFFSET_REGULATION_ERROR, "offset regulation error"),
        (Self::ALGORITHM_ERROR, "algorithm error"),
        (Self::OUTPUT_ERROR, "output error"),
        (Self::SELF_DIAGNOSTICS_ERROR, "self diagnostics error"),
        (Self::OUT_OF_RANGE, "out of range"),
        (Self::MEMORY_ERROR, "memory error"),
    ];

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 & Self::ANY_ERROR == 0
    }

    pub fn has(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    /// Descriptions of every error bit that is set
    pub fn errors(self) -> Vec<&'static str> {
        Self::DESCRIPTIONS
            .iter()
            .filter(|(mask, _)| self.has(*mask))
            .map(|(_, description)| *description)
            .collect()
    }
}

/// Output status register (IR3) view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputStatus(pub u16);

impl OutputStatus {
    /// Alarm output, inverted logic on the pin
    pub const ALARM: u16 = 0x0001;
    pub const PWM: u16 = 0x0002;

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn alarm_active(self) -> bool {
        self.0 & Self::ALARM != 0
    }

    pub fn pwm_enabled(self) -> bool {
        self.0 & Self::PWM != 0
    }
}

/// Check an ABC period before it goes on the wire
pub fn validate_abc_period(hours: u16) -> SensorResult<()> {
    if hours > ABC_PERIOD_MAX_HOURS {
        return Err(SensorError::invalid_precondition(format!(
            "ABC period {} hours outside 0-{}",
            hours, ABC_PERIOD_MAX_HOURS
        )));
    }
    Ok(())
}

/// Convert a raw PWM reading to ppm for a sensor with the given full scale
pub fn pwm_to_ppm(raw: i16, full_scale_ppm: f64) -> f64 {
    (raw as f64 / PWM_FULL_RANGE as f64) * full_scale_ppm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_order_matches_enum() {
        for (index, register) in Register::ALL.iter().enumerate() {
            assert_eq!(REGISTER_MAP[index].register, *register);
            assert_eq!(register.spec().register, *register);
        }
    }

    #[test]
    fn test_addresses() {
        assert_eq!(Register::Co2.address(), 0x0003);
        assert_eq!(Register::Co2.read_function(), FunctionCode::ReadInputRegisters);
        assert_eq!(Register::FirmwareVersion.address(), 0x001C);
        assert_eq!(Register::AbcPeriod.address(), 0x0020);
        assert_eq!(Register::AbcPeriod.read_function(), FunctionCode::ReadHoldingRegisters);
        assert!(Register::Acknowledgement.spec().is_writable());
        assert!(!Register::MeterStatus.spec().is_writable());
    }

    #[test]
    fn test_lookup_distinguishes_access_class() {
        assert_eq!(
            Register::lookup(FunctionCode::ReadInputRegisters, 0x0000),
            Some(Register::MeterStatus)
        );
        assert_eq!(
            Register::lookup(FunctionCode::ReadHoldingRegisters, 0x0000),
            Some(Register::Acknowledgement)
        );
        assert_eq!(
            Register::lookup(FunctionCode::WriteSingleRegister, 0x0001),
            Some(Register::SpecialCommand)
        );
        assert_eq!(Register::lookup(FunctionCode::ReadInputRegisters, 0x0100), None);
    }

    #[test]
    fn test_special_commands() {
        assert_eq!(SpecialCommand::BackgroundCalibration.value(), 0x7C06);
        assert_eq!(SpecialCommand::ZeroCalibration.value(), 0x7C07);
        assert_eq!(SpecialCommand::BackgroundCalibration.completion_mask(), 0x0020);
    }

    #[test]
    fn test_status_views() {
        let status = MeterStatus(MeterStatus::FATAL_ERROR | MeterStatus::OUT_OF_RANGE);
        assert!(!status.is_ok());
        assert_eq!(status.errors(), vec!["fatal error", "out of range"]);
        assert!(MeterStatus(0x0080).is_ok());

        assert!(Acknowledgement(0x0020).background_calibration_done());
        assert!(!Acknowledgement(0x0040).background_calibration_done());
        assert!(OutputStatus(0x0003).alarm_active());
        assert!(OutputStatus(0x0003).pwm_enabled());
    }

    #[test]
    fn test_abc_period_bounds() {
        assert!(validate_abc_period(0).is_ok());
        assert!(validate_abc_period(ABC_PERIOD_MAX_HOURS).is_ok());
        assert!(validate_abc_period(ABC_PERIOD_MAX_HOURS + 1).is_err());
        assert!(validate_abc_period(u16::MAX).is_err());
    }

    #[test]
    fn test_pwm_conversion() {
        assert_eq!(pwm_to_ppm(0, 2000.0), 0.0);
        assert!((pwm_to_ppm(0x3FFF, 2000.0) - 2000.0).abs() < 1e-9);
        assert!((pwm_to_ppm(0x3FFF / 2, 10000.0) - 4999.69).abs() < 0.01);
    }

    #[test]
    fn test_describe_value() {
        assert_eq!(Register::Co2.describe_value(400), "400 ppm");
        assert_eq!(Register::FirmwareVersion.describe_value(0x0102), "1.2");
        assert_eq!(Register::AbcPeriod.describe_value(180), "180 hours");
        assert_eq!(Register::MeterStatus.describe_value(0x0021), "b0000000000100001");
    }
}
