/// Request engine
///
/// Drives exactly one request/response exchange at a time: encode, write,
/// flush, then busy-poll the port until bytes show up or the deadline
/// passes. The first read after bytes become available is taken as the
/// whole response and handed to the frame codec. There is no retry.
///
/// The engine owns its scratch buffer and counters. The port is lent for the
/// duration of each call and never retained.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{SensorError, SensorResult};
use crate::logging::{hex_dump, CallbackLogger};
use crate::protocol::{
    decode_response, encode_request, Frame, FunctionCode, RegisterAddress, RegisterValue,
    ResponsePayload, MAX_FRAME_LEN, READ_RESPONSE_LEN, WRITE_RESPONSE_LEN,
};
use crate::registers::Register;
use crate::transport::{Clock, SensorPort, SystemClock, TransportStats};
use crate::utils::validation::{validate_expected_len, validate_timeout};
use crate::utils::PerformanceMetrics;

fn log_packet(direction: &str, data: &[u8], packet_logging: bool) {
    if packet_logging {
        info!("[S8-RTU] {} {}", direction, hex_dump(data));
    } else {
        debug!("[S8-RTU] {} {}", direction, hex_dump(data));
    }
}

/// Synchronous round-trip engine over an injected clock
pub struct RequestEngine<C: Clock = SystemClock> {
    clock: C,
    timeout_ms: u64,
    buffer: [u8; MAX_FRAME_LEN],
    stats: TransportStats,
    metrics: PerformanceMetrics,
    logger: Option<CallbackLogger>,
    packet_logging: bool,
}

impl RequestEngine<SystemClock> {
    /// Engine on the wall clock with the given per-call deadline
    pub fn with_timeout(timeout_ms: u64) -> SensorResult<Self> {
        Self::new(SystemClock::new(), timeout_ms)
    }
}

impl<C: Clock> RequestEngine<C> {
    /// Create an engine; a zero timeout is rejected
    pub fn new(clock: C, timeout_ms: u64) -> SensorResult<Self> {
        validate_timeout(timeout_ms)?;
        Ok(Self {
            clock,
            timeout_ms,
            buffer: [0u8; MAX_FRAME_LEN],
            stats: TransportStats::default(),
            metrics: PerformanceMetrics::new(),
            logger: None,
            packet_logging: false,
        })
    }

    /// Attach a callback logger that sees every frame
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn set_logger(&mut self, logger: Option<CallbackLogger>) {
        self.logger = logger;
    }

    /// Promote packet dumps from debug to info level
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn packet_logging(&self) -> bool {
        self.packet_logging
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u64) -> SensorResult<()> {
        validate_timeout(timeout_ms)?;
        self.timeout_ms = timeout_ms;
        Ok(())
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn reset_stats(&mut self) {
        self.stats = TransportStats::default();
        self.metrics.reset();
    }

    /// Perform one complete exchange
    ///
    /// # Arguments
    ///
    /// * `port` - Open channel to the sensor, borrowed for this call only
    /// * `function` - Function code of the request
    /// * `register` - Wire address of the register
    /// * `value` - Quantity for reads (must be 1), value to store for writes
    /// * `expected_len` - Response length for this command (1..=8)
    /// * `timeout_ms` - Deadline measured from the end of the flush
    ///
    /// # Returns
    ///
    /// * `Ok(payload)` - Validated response
    /// * `Err(error)` - Precondition, timeout, transport or validation failure
    pub fn round_trip<P: SensorPort + ?Sized>(
        &mut self,
        port: &mut P,
        function: FunctionCode,
        register: RegisterAddress,
        value: RegisterValue,
        expected_len: usize,
        timeout_ms: u64,
    ) -> SensorResult<ResponsePayload> {
        validate_expected_len(expected_len)?;
        validate_timeout(timeout_ms)?;
        let request = encode_request(function, register, value)?;

        let started = self.clock.now_ms();
        let result = self.exchange(port, &request, expected_len, timeout_ms);
        let elapsed = Duration::from_millis(self.clock.now_ms().saturating_sub(started));

        match &result {
            Ok(_) => {
                self.stats.responses_received += 1;
                self.metrics.record_success(elapsed);
            }
            Err(error) => {
                self.stats.errors += 1;
                if matches!(error, SensorError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                self.metrics.record_failure(elapsed, error);
                warn!("{} at 0x{:04X} failed: {}", function, register, error);
                if let Some(ref logger) = self.logger {
                    logger.warn(&format!("{} at 0x{:04X} failed: {}", function, register, error));
                }
            }
        }

        result
    }

    fn exchange<P: SensorPort + ?Sized>(
        &mut self,
        port: &mut P,
        request: &Frame,
        expected_len: usize,
        timeout_ms: u64,
    ) -> SensorResult<ResponsePayload> {
        log_packet("send", request, self.packet_logging);
        if let Some(ref logger) = self.logger {
            logger.log_request(request);
        }

        self.discard_stale_input(port)?;

        port.write(request)?;
        port.flush()?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += request.len() as u64;

        let start = self.clock.now_ms();
        loop {
            let now = self.clock.now_ms();
            if port.bytes_available()? > 0 {
                let received = port.read_available(&mut self.buffer[..expected_len])?;
                self.stats.bytes_received += received as u64;

                let response = &self.buffer[..received];
                log_packet("receive", response, self.packet_logging);
                if let Some(ref logger) = self.logger {
                    logger.log_response(request, response);
                }
                return decode_response(request, response);
            }

            if now.saturating_sub(start) > timeout_ms {
                return Err(SensorError::timeout(
                    format!("no response to function 0x{:02X}", request[1]),
                    timeout_ms,
                ));
            }

            self.clock.relax();
        }
    }

    /// Drop leftovers of an earlier exchange (a late reply after a timeout,
    /// or the tail of an overlong response) so they are never decoded as
    /// the answer to the next request
    fn discard_stale_input<P: SensorPort + ?Sized>(&mut self, port: &mut P) -> SensorResult<()> {
        let mut discarded = 0u64;
        while port.bytes_available()? > 0 {
            let read = port.read_available(&mut self.buffer)?;
            if read == 0 {
                break;
            }
            discarded += read as u64;
        }

        if discarded > 0 {
            self.stats.bytes_discarded += discarded;
            warn!("Discarded {} stale bytes before request", discarded);
            if let Some(ref logger) = self.logger {
                logger.warn(&format!("Discarded {} stale bytes before request", discarded));
            }
        }
        Ok(())
    }

    /// Read one register from the map with the engine's deadline
    pub fn read_register<P: SensorPort + ?Sized>(
        &mut self,
        port: &mut P,
        register: Register,
    ) -> SensorResult<RegisterValue> {
        let value = self
            .round_trip(
                port,
                register.read_function(),
                register.address(),
                1,
                READ_RESPONSE_LEN,
                self.timeout_ms,
            )?
            .register_value()?;
        debug!("{} = {}", register, register.describe_value(value));
        Ok(value)
    }

    /// Write one holding register and verify the echo
    pub fn write_register<P: SensorPort + ?Sized>(
        &mut self,
        port: &mut P,
        register: Register,
        value: RegisterValue,
    ) -> SensorResult<()> {
        if !register.spec().is_writable() {
            return Err(SensorError::invalid_precondition(format!(
                "{} is read-only",
                register
            )));
        }
        self.round_trip(
            port,
            FunctionCode::WriteSingleRegister,
            register.address(),
            value,
            WRITE_RESPONSE_LEN,
            self.timeout_ms,
        )?;
        debug!("{} <- {}", register, register.describe_value(value));
        Ok(())
    }
}
