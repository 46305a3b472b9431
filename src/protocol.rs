/// S8 protocol definitions and frame codec
///
/// This module contains the Modbus-RTU subset spoken by the SenseAir S8:
/// the three function codes it answers, the CRC16 checksum, request frame
/// construction and response frame validation.
///
/// Every request is 8 bytes:
///
/// ```text
/// ┌─────────┬──────────┬──────────────┬──────────────┬────────┬────────┐
/// │ address │ function │ register (BE)│ value (BE)   │ crc lo │ crc hi │
/// └─────────┴──────────┴──────────────┴──────────────┴────────┴────────┘
/// ```
///
/// Register reads are answered with 7 bytes
/// (`address | function | byte count | data hi | data lo | crc lo | crc hi`),
/// single-register writes are answered with an exact echo of the request.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SensorError, SensorResult};

/// Register address type (0-65535)
pub type RegisterAddress = u16;

/// Raw 16-bit register value as transmitted
pub type RegisterValue = u16;

/// Address byte used by every frame; the S8 answers on "any address"
pub const ANY_ADDRESS: u8 = 0xFE;

/// Length of every request frame
pub const REQUEST_FRAME_LEN: usize = 8;

/// Length of a single-register read response
pub const READ_RESPONSE_LEN: usize = 7;

/// Length of a write acknowledgement (echo of the request)
pub const WRITE_RESPONSE_LEN: usize = 8;

/// Largest frame exchanged with the sensor in either direction
pub const MAX_FRAME_LEN: usize = 8;

/// Request frame as put on the wire
pub type Frame = [u8; REQUEST_FRAME_LEN];

/// CRC calculator for RTU framing
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Function codes understood by the S8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
}

impl FunctionCode {
    /// Convert from u8 to FunctionCode
    pub fn from_u8(value: u8) -> SensorResult<Self> {
        match value {
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            _ => Err(SensorError::unexpected_response(format!(
                "Unsupported function code 0x{:02X}",
                value
            ))),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a register read
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters
        )
    }

    /// Check if this is a register write
    pub fn is_write_function(self) -> bool {
        matches!(self, FunctionCode::WriteSingleRegister)
    }

    /// Number of bytes the sensor answers with for this function
    pub fn expected_response_len(self) -> usize {
        if self.is_read_function() {
            READ_RESPONSE_LEN
        } else {
            WRITE_RESPONSE_LEN
        }
    }

    /// Human-readable name without the numeric code
    pub fn name(self) -> &'static str {
        match self {
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleRegister => "Write Single Register",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Compute the Modbus CRC16 of `data`
///
/// Polynomial 0xA001 (reflected 0x8005), initial value 0xFFFF. On the wire
/// the result travels low byte first.
///
/// ```rust
/// use senseair_s8::protocol::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x4B37);
/// assert_eq!(crc16(&[0x01, 0x02]), 0xE181);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Check the trailing little-endian CRC of a complete frame
///
/// Returns the `(computed, transmitted)` pair on mismatch as a
/// `ChecksumInvalid` error. Frames too short to carry a CRC are rejected as
/// `InvalidPrecondition`; callers check the expected length first.
pub fn check_crc(frame: &[u8]) -> SensorResult<()> {
    if frame.len() < 3 {
        return Err(SensorError::invalid_precondition(format!(
            "{}-byte frame has no room for a CRC",
            frame.len()
        )));
    }
    let data_len = frame.len() - 2;
    let transmitted = LittleEndian::read_u16(&frame[data_len..]);
    let computed = crc16(&frame[..data_len]);
    if computed != transmitted {
        return Err(SensorError::checksum_invalid(computed, transmitted));
    }
    Ok(())
}

/// Build a request frame
///
/// Reads must ask for exactly one register (`value == 1`); the S8 register
/// map is only ever accessed one word at a time. Writes carry the value to
/// store.
pub fn encode_request(
    function: FunctionCode,
    register: RegisterAddress,
    value: RegisterValue,
) -> SensorResult<Frame> {
    if function.is_read_function() && value != 1 {
        return Err(SensorError::invalid_precondition(format!(
            "{} must request exactly one register, got {}",
            function, value
        )));
    }

    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame[0] = ANY_ADDRESS;
    frame[1] = function.to_u8();
    BigEndian::write_u16(&mut frame[2..4], register);
    BigEndian::write_u16(&mut frame[4..6], value);
    let crc = crc16(&frame[..6]);
    LittleEndian::write_u16(&mut frame[6..8], crc);

    Ok(frame)
}

/// Validated response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Value of the register that was read
    Register(RegisterValue),
    /// The sensor echoed a single-register write
    WriteAck {
        register: RegisterAddress,
        value: RegisterValue,
    },
}

impl ResponsePayload {
    /// Register value of a read response
    pub fn register_value(self) -> SensorResult<RegisterValue> {
        match self {
            ResponsePayload::Register(value) => Ok(value),
            ResponsePayload::WriteAck { .. } => Err(SensorError::unexpected_response(
                "Write acknowledgement carries no register data",
            )),
        }
    }
}

/// Validate a register-read response and extract its data word
///
/// Checks, in order: length, CRC, then the address byte, the function byte
/// (either read code) and the byte count field.
pub fn decode_read_response(frame: &[u8]) -> SensorResult<RegisterValue> {
    if frame.len() != READ_RESPONSE_LEN {
        return Err(SensorError::unexpected_length(READ_RESPONSE_LEN, frame.len()));
    }

    check_crc(frame)?;

    if frame[0] != ANY_ADDRESS {
        return Err(SensorError::unexpected_response(format!(
            "Address 0x{:02X}, expected 0x{:02X}",
            frame[0], ANY_ADDRESS
        )));
    }

    match FunctionCode::from_u8(frame[1]) {
        Ok(function) if function.is_read_function() => {}
        _ => {
            return Err(SensorError::unexpected_response(format!(
                "Function 0x{:02X} is not a register read",
                frame[1]
            )))
        }
    }

    if frame[2] as usize != frame.len() - 5 {
        return Err(SensorError::unexpected_response(format!(
            "Byte count {} inconsistent with a {}-byte frame",
            frame[2],
            frame.len()
        )));
    }

    Ok(BigEndian::read_u16(&frame[3..5]))
}

/// Validate a write acknowledgement
///
/// The sensor echoes the request; the acknowledgement is valid only when it
/// is byte-for-byte identical to what was sent.
pub fn verify_write_echo(request: &Frame, response: &[u8]) -> SensorResult<()> {
    if response.len() != WRITE_RESPONSE_LEN {
        return Err(SensorError::unexpected_length(WRITE_RESPONSE_LEN, response.len()));
    }

    if let Some(index) = request.iter().zip(response).position(|(sent, echoed)| sent != echoed) {
        return Err(SensorError::unexpected_response(format!(
            "Write echo differs at byte {}: sent 0x{:02X}, received 0x{:02X}",
            index, request[index], response[index]
        )));
    }

    Ok(())
}

/// Validate any response against the request that produced it
pub fn decode_response(request: &Frame, response: &[u8]) -> SensorResult<ResponsePayload> {
    let function = FunctionCode::from_u8(request[1])?;
    if function.is_read_function() {
        decode_read_response(response).map(ResponsePayload::Register)
    } else {
        verify_write_echo(request, response)?;
        Ok(ResponsePayload::WriteAck {
            register: BigEndian::read_u16(&request[2..4]),
            value: BigEndian::read_u16(&request[4..6]),
        })
    }
}

/// Build a register-read response frame (what the sensor sends back)
pub fn encode_read_response(function: FunctionCode, value: RegisterValue) -> [u8; READ_RESPONSE_LEN] {
    let mut frame = [0u8; READ_RESPONSE_LEN];
    frame[0] = ANY_ADDRESS;
    frame[1] = function.to_u8();
    frame[2] = 2;
    BigEndian::write_u16(&mut frame[3..5], value);
    let crc = crc16(&frame[..5]);
    LittleEndian::write_u16(&mut frame[5..7], crc);
    frame
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Combine two registers into a u32, high word first
    pub fn registers_to_u32(high: RegisterValue, low: RegisterValue) -> u32 {
        ((high as u32) << 16) | (low as u32)
    }

    /// Reinterpret a raw register as a signed 16-bit quantity
    pub fn register_to_i16(value: RegisterValue) -> i16 {
        value as i16
    }

    /// Render a packed firmware register (major in the high byte) as "major.minor"
    pub fn firmware_version_string(value: RegisterValue) -> String {
        format!("{}.{}", value >> 8, value & 0x00FF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise reference implementation of the Modbus CRC16
    fn reference_crc16(data: &[u8]) -> u16 {
        let mut crc = 0xFFFFu16;
        for byte in data {
            crc ^= *byte as u16;
            for _ in 0..8 {
                if crc & 0x0001 != 0 {
                    crc = (crc >> 1) ^ 0xA001;
                } else {
                    crc >>= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn test_function_conversion() {
        assert_eq!(FunctionCode::from_u8(0x04).unwrap(), FunctionCode::ReadInputRegisters);
        assert_eq!(FunctionCode::WriteSingleRegister.to_u8(), 0x06);
        assert!(FunctionCode::from_u8(0x10).is_err());
        assert_eq!(FunctionCode::ReadHoldingRegisters.expected_response_len(), 7);
        assert_eq!(FunctionCode::WriteSingleRegister.expected_response_len(), 8);
    }

    #[test]
    fn test_crc_matches_reference() {
        let vectors: [&[u8]; 5] = [
            &[0x01, 0x02],
            b"123456789",
            &[0xFE, 0x04, 0x00, 0x03, 0x00, 0x01],
            &[0xFE, 0x04, 0x02, 0x01, 0x90],
            &[],
        ];
        for data in vectors {
            assert_eq!(crc16(data), reference_crc16(data), "vector {:02X?}", data);
        }
        assert_eq!(crc16(&[0x01, 0x02]), 0xE181);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_encode_read_co2() {
        let frame = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();
        assert_eq!(frame, [0xFE, 0x04, 0x00, 0x03, 0x00, 0x01, 0xD5, 0xC5]);
    }

    #[test]
    fn test_encode_write_abc_period() {
        let frame = encode_request(FunctionCode::WriteSingleRegister, 0x0020, 180).unwrap();
        assert_eq!(frame, [0xFE, 0x06, 0x00, 0x20, 0x00, 0xB4, 0x9C, 0x78]);
    }

    #[test]
    fn test_encode_rejects_multi_register_reads() {
        for quantity in [0u16, 2, 125] {
            let err = encode_request(FunctionCode::ReadHoldingRegisters, 0x0000, quantity).unwrap_err();
            assert!(matches!(err, SensorError::InvalidPrecondition { .. }));
        }
    }

    #[test]
    fn test_encoded_crc_is_self_consistent() {
        for function in [
            FunctionCode::ReadInputRegisters,
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::WriteSingleRegister,
        ] {
            for register in [0x0000u16, 0x0003, 0x001F, 0xFFFF] {
                let value = if function.is_read_function() { 1 } else { register ^ 0x5A5A };
                let frame = encode_request(function, register, value).unwrap();
                assert!(check_crc(&frame).is_ok());
            }
        }
    }

    #[test]
    fn test_check_crc_short_frame() {
        for frame in [&[][..], &[0xFE][..], &[0xFE, 0x06][..]] {
            assert!(matches!(
                check_crc(frame).unwrap_err(),
                SensorError::InvalidPrecondition { .. }
            ));
        }
        // Three bytes: one data byte and its CRC
        let crc = crc16(&[0xFE]).to_le_bytes();
        assert!(check_crc(&[0xFE, crc[0], crc[1]]).is_ok());
    }

    #[test]
    fn test_decode_read_response() {
        let frame = [0xFE, 0x04, 0x02, 0x01, 0x90, 0xAC, 0xD8];
        assert_eq!(decode_read_response(&frame).unwrap(), 400);
        assert_eq!(encode_read_response(FunctionCode::ReadInputRegisters, 400), frame);
    }

    #[test]
    fn test_decode_checks_length_first() {
        let frame = [0xFE, 0x04, 0x02, 0x01, 0x90, 0xAC];
        assert_eq!(
            decode_read_response(&frame).unwrap_err(),
            SensorError::unexpected_length(7, 6)
        );
        assert!(matches!(
            decode_read_response(&[]).unwrap_err(),
            SensorError::UnexpectedLength { expected: 7, actual: 0 }
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_fields() {
        // Correct CRC, wrong address
        let mut frame = [0x01, 0x04, 0x02, 0x01, 0x90, 0, 0];
        let crc = crc16(&frame[..5]);
        frame[5..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            decode_read_response(&frame).unwrap_err(),
            SensorError::UnexpectedResponse { .. }
        ));

        // Correct CRC, write function code
        let mut frame = [0xFE, 0x06, 0x02, 0x01, 0x90, 0, 0];
        let crc = crc16(&frame[..5]);
        frame[5..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            decode_read_response(&frame).unwrap_err(),
            SensorError::UnexpectedResponse { .. }
        ));

        // Correct CRC, bad byte count
        let mut frame = [0xFE, 0x03, 0x04, 0x01, 0x90, 0, 0];
        let crc = crc16(&frame[..5]);
        frame[5..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            decode_read_response(&frame).unwrap_err(),
            SensorError::UnexpectedResponse { .. }
        ));
    }

    #[test]
    fn test_single_bit_flips_never_accepted() {
        let frame = [0xFE, 0x04, 0x02, 0x01, 0x90, 0xAC, 0xD8];
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                match decode_read_response(&corrupted) {
                    Err(SensorError::ChecksumInvalid { .. })
                    | Err(SensorError::UnexpectedResponse { .. }) => {}
                    other => panic!("byte {} bit {} accepted: {:?}", byte, bit, other),
                }
            }
        }
    }

    #[test]
    fn test_write_echo() {
        let request = encode_request(FunctionCode::WriteSingleRegister, 0x0000, 0x0000).unwrap();
        assert!(verify_write_echo(&request, &request).is_ok());

        for index in 0..request.len() {
            let mut echo = request;
            echo[index] = echo[index].wrapping_add(1);
            assert!(matches!(
                verify_write_echo(&request, &echo).unwrap_err(),
                SensorError::UnexpectedResponse { .. }
            ));
        }

        assert!(matches!(
            verify_write_echo(&request, &request[..7]).unwrap_err(),
            SensorError::UnexpectedLength { expected: 8, actual: 7 }
        ));
    }

    #[test]
    fn test_decode_response_dispatch() {
        let read = encode_request(FunctionCode::ReadHoldingRegisters, 0x0020, 1).unwrap();
        let answer = encode_read_response(FunctionCode::ReadHoldingRegisters, 180);
        assert_eq!(decode_response(&read, &answer).unwrap(), ResponsePayload::Register(180));

        let write = encode_request(FunctionCode::WriteSingleRegister, 0x0001, 0x7C06).unwrap();
        assert_eq!(
            decode_response(&write, &write).unwrap(),
            ResponsePayload::WriteAck { register: 0x0001, value: 0x7C06 }
        );
        assert!(ResponsePayload::WriteAck { register: 1, value: 2 }.register_value().is_err());
    }

    #[test]
    fn test_data_utils() {
        assert_eq!(data_utils::registers_to_u32(0x1234, 0x5678), 0x1234_5678);
        assert_eq!(data_utils::register_to_i16(0xFFFF), -1);
        assert_eq!(data_utils::firmware_version_string(0x0A0B), "10.11");
    }
}
