//! # SenseAir S8 Error Handling
//!
//! This module provides the error taxonomy for the S8 protocol engine. Every
//! failure a round trip can produce is recovered locally into a single
//! `SensorError` value; nothing in the engine panics or aborts the caller.
//!
//! ## Error Categories
//!
//! ### Precondition Errors
//! - **Invalid Precondition**: rejected before any byte is written (ABC period
//!   out of range, zero timeout, read quantity other than one)
//!
//! ### Transport Errors
//! - **Timeout**: no byte arrived before the deadline
//! - **I/O Errors**: the serial backend failed to write, flush or read
//!
//! ### Protocol Errors
//! - **Unexpected Length**: the received byte count does not match the command
//! - **Checksum Invalid**: CRC16 mismatch (line noise, framing desync)
//! - **Unexpected Response**: well-formed frame with wrong address, function
//!   code or byte count, or a write echo that differs from the request
//!
//! ### System Errors
//! - **Configuration Errors**: unreadable or invalid configuration files
//!
//! ## Error Recovery
//!
//! The engine never retries. Callers that want resilience re-issue the whole
//! operation when `is_recoverable()` says it may help:
//!
//! ```rust
//! use senseair_s8::{SensorError, SensorResult};
//!
//! fn read_with_retry<F>(mut operation: F, max_retries: usize) -> SensorResult<i16>
//! where
//!     F: FnMut() -> SensorResult<i16>,
//! {
//!     let mut attempt = 0;
//!     loop {
//!         match operation() {
//!             Ok(value) => return Ok(value),
//!             Err(error) if error.is_recoverable() && attempt < max_retries => {
//!                 attempt += 1;
//!             }
//!             Err(error) => return Err(error),
//!         }
//!     }
//! }
//!
//! let mut calls = 0;
//! let result = read_with_retry(|| {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(SensorError::timeout("read CO2", 5000))
//!     } else {
//!         Ok(412)
//!     }
//! }, 5);
//! assert_eq!(result.unwrap(), 412);
//! ```

use thiserror::Error;

/// Result type alias for sensor operations
///
/// Every facade call returns this type: either the decoded value or the
/// reason the round trip failed. A legitimate reading of zero is `Ok(0)`.
pub type SensorResult<T> = Result<T, SensorError>;

/// S8 protocol engine error types
///
/// Each variant carries enough context to diagnose the failing exchange
/// without re-running it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Rejected before any I/O
    ///
    /// # Examples
    /// - ABC period above 4800 hours
    /// - Zero timeout
    /// - Register read with a quantity other than one
    #[error("Invalid precondition: {message}")]
    InvalidPrecondition { message: String },

    /// No response arrived within the deadline
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Received byte count does not match the count expected for the command
    #[error("Unexpected length: expected {expected} bytes, received {actual}")]
    UnexpectedLength { expected: usize, actual: usize },

    /// CRC16 validation failure
    ///
    /// `expected` is the CRC recomputed over the received bytes, `actual` the
    /// CRC carried by the frame.
    #[error("Checksum invalid: expected={expected:04X}, actual={actual:04X}")]
    ChecksumInvalid { expected: u16, actual: u16 },

    /// Well-formed but semantically wrong frame
    ///
    /// # Examples
    /// - Address byte other than the any-address marker
    /// - Function code that is not a register read
    /// - Byte count field inconsistent with the frame length
    /// - Write acknowledgement that is not an exact echo of the request
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// Serial backend failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Configuration loading or validation failure
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SensorError {
    /// Create a new precondition error
    pub fn invalid_precondition<S: Into<String>>(message: S) -> Self {
        Self::InvalidPrecondition { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a length mismatch error
    pub fn unexpected_length(expected: usize, actual: usize) -> Self {
        Self::UnexpectedLength { expected, actual }
    }

    /// Create a CRC mismatch error
    ///
    /// # Arguments
    ///
    /// * `expected` - CRC recomputed over the received bytes
    /// * `actual` - CRC transmitted in the frame
    pub fn checksum_invalid(expected: u16, actual: u16) -> Self {
        Self::ChecksumInvalid { expected, actual }
    }

    /// Create an unexpected response error
    pub fn unexpected_response<S: Into<String>>(message: S) -> Self {
        Self::UnexpectedResponse { message: message.into() }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if re-issuing the whole round trip might succeed
    ///
    /// Timeouts, I/O hiccups and corrupted or truncated frames are typical of
    /// a noisy half-duplex line. Precondition, configuration and semantic
    /// response errors will fail the same way again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use senseair_s8::SensorError;
    ///
    /// assert!(SensorError::timeout("read CO2", 5000).is_recoverable());
    /// assert!(SensorError::checksum_invalid(0x1234, 0x4321).is_recoverable());
    /// assert!(!SensorError::invalid_precondition("ABC period 5000").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Io { .. }
                | Self::ChecksumInvalid { .. }
                | Self::UnexpectedLength { .. }
        )
    }

    /// Check if the error comes from the serial link rather than the frame
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Timeout { .. })
    }

    /// Check if the error is a frame validation failure
    ///
    /// # Examples
    ///
    /// ```rust
    /// use senseair_s8::SensorError;
    ///
    /// assert!(SensorError::unexpected_length(7, 3).is_protocol_error());
    /// assert!(!SensorError::io("port closed").is_protocol_error());
    /// ```
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedLength { .. }
                | Self::ChecksumInvalid { .. }
                | Self::UnexpectedResponse { .. }
        )
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for SensorError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from serial backend errors
impl From<serialport::Error> for SensorError {
    fn from(err: serialport::Error) -> Self {
        Self::io(format!("Serial port error: {}", err))
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for SensorError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for SensorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SensorError::timeout("read CO2", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());
        assert!(!err.is_protocol_error());

        let err = SensorError::unexpected_response("wrong address");
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());

        let err = SensorError::invalid_precondition("ABC period 4801");
        assert!(!err.is_recoverable());
        assert!(!err.is_transport_error());
        assert!(!err.is_protocol_error());
    }

    #[test]
    fn test_error_display() {
        let err = SensorError::checksum_invalid(0x1234, 0x5678);
        let msg = format!("{}", err);
        assert!(msg.contains("Checksum invalid"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("5678"));

        let msg = SensorError::unexpected_length(7, 5).to_string();
        assert_eq!(msg, "Unexpected length: expected 7 bytes, received 5");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "line dropped");
        let err: SensorError = io.into();
        assert!(matches!(err, SensorError::Io { .. }));
        assert!(err.to_string().contains("line dropped"));
    }
}
