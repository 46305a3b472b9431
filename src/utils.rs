/// Utility functions and helpers for sensor operations
///
/// Round-trip metrics, precondition checks, display formatting and test
/// logger setup.

use std::time::{Duration, Instant};
use log::{debug, info, warn};

use crate::error::{SensorError, SensorResult};

/// Timing and outcome metrics for request round trips
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub checksum_failures: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a round trip that produced a valid response
    pub fn record_success(&mut self, duration: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
        self.accumulate(duration);
    }

    /// Record a failed round trip and classify its error
    pub fn record_failure(&mut self, duration: Duration, error: &SensorError) {
        self.total_requests += 1;
        self.failed_requests += 1;
        match error {
            SensorError::Timeout { .. } => self.timeouts += 1,
            SensorError::ChecksumInvalid { .. } => self.checksum_failures += 1,
            _ => {}
        }
        self.accumulate(duration);
    }

    fn accumulate(&mut self, duration: Duration) {
        self.total_duration += duration;
        self.avg_duration = self.total_duration / self.total_requests as u32;
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn start(operation_name: &str) -> Self {
        debug!("Starting operation: {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!("Operation '{}' completed in {:?}", self.operation_name, duration);
        duration
    }

    /// Stop timer and log result
    pub fn stop_and_log(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        if success {
            info!("✅ {} succeeded in {}", self.operation_name, format::format_duration(duration));
        } else {
            warn!("❌ {} failed after {}", self.operation_name, format::format_duration(duration));
        }
        duration
    }
}

/// Checks applied before any byte is written
pub mod validation {
    use super::*;
    use crate::protocol::MAX_FRAME_LEN;

    /// Baud rates the S8 UART can be configured for
    pub const SUPPORTED_BAUD_RATES: [u32; 4] = [9600, 19200, 38400, 115200];

    /// A response deadline must be positive
    pub fn validate_timeout(timeout_ms: u64) -> SensorResult<()> {
        if timeout_ms == 0 {
            return Err(SensorError::invalid_precondition("Timeout must be positive"));
        }
        Ok(())
    }

    /// Response length must fit the receive buffer
    pub fn validate_expected_len(expected_len: usize) -> SensorResult<()> {
        if expected_len == 0 || expected_len > MAX_FRAME_LEN {
            return Err(SensorError::invalid_precondition(format!(
                "Expected response length {} outside 1-{}",
                expected_len, MAX_FRAME_LEN
            )));
        }
        Ok(())
    }

    pub fn validate_baud_rate(baud_rate: u32) -> SensorResult<()> {
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(SensorError::configuration(format!(
                "Unsupported baud rate {} (expected one of {:?})",
                baud_rate, SUPPORTED_BAUD_RATES
            )));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        crate::logging::hex_dump(bytes)
    }

    /// Bit pattern of a status register, grouped by nibble
    pub fn format_binary(value: u16) -> String {
        let bits = format!("{:016b}", value);
        bits.as_bytes()
            .chunks(4)
            .map(|nibble| String::from_utf8_lossy(nibble).into_owned())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Zero-padded uppercase hex of a 32-bit identifier
    pub fn format_id_hex(value: u32) -> String {
        format!("0x{:08X}", value)
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Format performance metrics as a table
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        format!(
            "Round trips:\n\
             ├─ Total: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {} (timeouts {}, bad CRC {})\n\
             ├─ Average: {}\n\
             ├─ Min: {}\n\
             └─ Max: {}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            metrics.timeouts,
            metrics.checksum_failures,
            format_duration(metrics.avg_duration),
            metrics.min_duration.map_or("N/A".to_string(), format_duration),
            metrics.max_duration.map_or("N/A".to_string(), format_duration),
        )
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize env_logger for tests, ignoring repeat calls
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}
