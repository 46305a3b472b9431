//! # S8 Transport Layer
//!
//! The protocol engine never opens or closes a link itself: it is handed an
//! already-open byte channel implementing [`SensorPort`] and a monotonic
//! [`Clock`] used to measure response timeouts.
//!
//! ## Provided Implementations
//!
//! ### Serial (`SerialTransport`)
//! - RS-232/TTL UART through the `serialport` crate
//! - 8 data bits, no parity, one stop bit, no flow control
//! - Reads drain one response frame, using the RTU inter-frame gap derived
//!   from the baud rate to detect its end
//!
//! ### In-memory (`SimulatedSensor`)
//! - See [`crate::simulator`]; answers like a real S8 without hardware
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use senseair_s8::transport::{SerialTransport, SensorPort};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut port = SerialTransport::open("/dev/ttyUSB0", 9600)?;
//!
//!     // Raw CO2 request, normally built by the frame codec
//!     port.write(&[0xFE, 0x04, 0x00, 0x03, 0x00, 0x01, 0xD5, 0xC5])?;
//!     port.flush()?;
//!     println!("bytes waiting: {}", port.bytes_available()?);
//!     Ok(())
//! }
//! ```

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::SensorConfig;
use crate::error::{SensorError, SensorResult};

/// Byte-oriented duplex channel to the sensor
///
/// All operations block the caller; none of them waits for data that has not
/// arrived yet. The engine calls them strictly in the order
/// `write`, `flush`, then `bytes_available`/`read_available` polling.
pub trait SensorPort {
    /// Send exactly the given bytes
    fn write(&mut self, bytes: &[u8]) -> SensorResult<()>;

    /// Block until written bytes are physically transmitted
    fn flush(&mut self) -> SensorResult<()>;

    /// Number of bytes that can be read without blocking
    fn bytes_available(&mut self) -> SensorResult<usize>;

    /// Read up to `buf.len()` bytes that are currently buffered
    ///
    /// Returns the number of bytes copied, possibly zero.
    fn read_available(&mut self, buf: &mut [u8]) -> SensorResult<usize>;
}

impl<P: SensorPort + ?Sized> SensorPort for &mut P {
    fn write(&mut self, bytes: &[u8]) -> SensorResult<()> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> SensorResult<()> {
        (**self).flush()
    }

    fn bytes_available(&mut self) -> SensorResult<usize> {
        (**self).bytes_available()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> SensorResult<usize> {
        (**self).read_available(buf)
    }
}

impl<P: SensorPort + ?Sized> SensorPort for Box<P> {
    fn write(&mut self, bytes: &[u8]) -> SensorResult<()> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> SensorResult<()> {
        (**self).flush()
    }

    fn bytes_available(&mut self) -> SensorResult<usize> {
        (**self).bytes_available()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> SensorResult<usize> {
        (**self).read_available(buf)
    }
}

/// Monotonic millisecond clock
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin; never goes backwards
    fn now_ms(&self) -> u64;

    /// Called once per idle poll iteration while waiting for a response
    fn relax(&self) {
        std::hint::spin_loop();
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn relax(&self) {
        (**self).relax()
    }
}

/// Wall clock backed by `std::time::Instant`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Stale input dropped before sending a request
    pub bytes_discarded: u64,
}

impl TransportStats {
    /// Percentage of requests that produced a valid response
    pub fn success_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 0.0;
        }
        let valid = self.requests_sent.saturating_sub(self.errors);
        (valid as f64 / self.requests_sent as f64) * 100.0
    }
}

/// Minimum RTU inter-frame gap used for baud rates above 19200
const MIN_FRAME_GAP: Duration = Duration::from_micros(1750);

/// 3.5 character times at `baud_rate`, 11 bits per character
pub fn frame_gap_for_baud(baud_rate: u32) -> Duration {
    let char_time_us = 11_000_000 / baud_rate.max(1) as u64;
    let gap = Duration::from_micros(char_time_us * 35 / 10);
    if baud_rate > 19200 {
        gap.max(MIN_FRAME_GAP)
    } else {
        gap
    }
}

/// S8 UART link over a host serial port
pub struct SerialTransport {
    /// Serial port connection
    port: Box<dyn serialport::SerialPort>,
    /// Port name/path
    port_name: String,
    /// Baud rate
    baud_rate: u32,
    /// Silence that marks the end of a response frame
    frame_gap: Duration,
}

impl SerialTransport {
    /// Open a port with the S8 line settings (8N1)
    pub fn open(port: &str, baud_rate: u32) -> SensorResult<Self> {
        Self::open_with_gap(port, baud_rate, frame_gap_for_baud(baud_rate))
    }

    /// Open the port described by a configuration
    pub fn from_config(config: &SensorConfig) -> SensorResult<Self> {
        config.validate()?;
        let gap = config
            .frame_gap_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| frame_gap_for_baud(config.baud_rate));
        Self::open_with_gap(&config.port, config.baud_rate, gap)
    }

    fn open_with_gap(port: &str, baud_rate: u32, frame_gap: Duration) -> SensorResult<Self> {
        if baud_rate == 0 {
            return Err(SensorError::configuration("Baud rate must be positive"));
        }

        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| SensorError::io(format!("Failed to open serial port {}: {}", port, e)))?;

        // Drop whatever the sensor or the adapter left in the buffers
        serial.clear(serialport::ClearBuffer::All)?;

        debug!("opened {} at {} baud, frame gap {:?}", port, baud_rate, frame_gap);

        Ok(Self {
            port: serial,
            port_name: port.to_string(),
            baud_rate,
            frame_gap,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }
}

impl SensorPort for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> SensorResult<()> {
        self.port
            .write_all(bytes)
            .map_err(|e| SensorError::io(format!("Failed to send frame: {}", e)))
    }

    fn flush(&mut self) -> SensorResult<()> {
        self.port
            .flush()
            .map_err(|e| SensorError::io(format!("Failed to flush {}: {}", self.port_name, e)))
    }

    fn bytes_available(&mut self) -> SensorResult<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> SensorResult<usize> {
        drain_frame(&mut self.port, buf, self.frame_gap)
    }
}

/// Receive side of a serial line
trait RxLine {
    fn pending(&mut self) -> SensorResult<usize>;
    fn read_some(&mut self, buf: &mut [u8]) -> SensorResult<usize>;
}

impl RxLine for Box<dyn serialport::SerialPort> {
    fn pending(&mut self) -> SensorResult<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> SensorResult<usize> {
        (**self)
            .read(buf)
            .map_err(|e| SensorError::io(format!("Serial read error: {}", e)))
    }
}

/// Read one frame: bytes arrive back to back, so stop once `buf` is full
/// or the line stays silent for `frame_gap`
fn drain_frame<L: RxLine + ?Sized>(line: &mut L, buf: &mut [u8], frame_gap: Duration) -> SensorResult<usize> {
    let mut total = 0;
    let mut last_byte = Instant::now();

    while total < buf.len() {
        let available = line.pending()?;
        if available > 0 {
            let wanted = available.min(buf.len() - total);
            let read = line.read_some(&mut buf[total..total + wanted])?;
            if read > 0 {
                total += read;
                last_byte = Instant::now();
                continue;
            }
        }
        if last_byte.elapsed() >= frame_gap {
            break;
        }
        std::thread::yield_now();
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingClock {
        ticks: std::cell::Cell<u64>,
    }

    impl Clock for CountingClock {
        fn now_ms(&self) -> u64 {
            let now = self.ticks.get();
            self.ticks.set(now + 1);
            now
        }
    }

    #[test]
    fn test_frame_gap_calculation() {
        // 9600 baud: 1145us per character, 3.5 characters
        assert_eq!(frame_gap_for_baud(9600), Duration::from_micros(4007));
        assert_eq!(frame_gap_for_baud(115200), MIN_FRAME_GAP);
        for baud in [1200u32, 2400, 4800, 9600, 19200] {
            assert!(frame_gap_for_baud(baud) >= Duration::from_micros(11_000_000 / baud as u64 * 3));
        }
    }

    #[test]
    fn test_clock_by_reference() {
        let clock = CountingClock { ticks: std::cell::Cell::new(10) };
        let borrowed = &clock;
        assert_eq!(borrowed.now_ms(), 10);
        assert_eq!(clock.now_ms(), 11);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        let second = clock.now_ms();
        assert!(second >= first);
    }

    /// Delivers queued chunks; an empty chunk is a silence that lasts until popped
    #[derive(Default)]
    struct FakeLine {
        chunks: std::collections::VecDeque<Vec<u8>>,
    }

    impl RxLine for FakeLine {
        fn pending(&mut self) -> SensorResult<usize> {
            Ok(self.chunks.front().map_or(0, Vec::len))
        }

        fn read_some(&mut self, buf: &mut [u8]) -> SensorResult<usize> {
            let Some(chunk) = self.chunks.front_mut() else {
                return Ok(0);
            };
            let count = buf.len().min(chunk.len());
            buf[..count].copy_from_slice(&chunk[..count]);
            chunk.drain(..count);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
            Ok(count)
        }
    }

    #[test]
    fn test_drain_stops_at_first_silence() {
        let mut line = FakeLine::default();
        line.chunks.push_back(vec![0xFE, 0x04, 0x02]);
        line.chunks.push_back(vec![0x01, 0x90]);
        line.chunks.push_back(Vec::new());
        line.chunks.push_back(vec![0xAC, 0xD8]);

        let mut buf = [0u8; 7];
        let gap = Duration::from_millis(2);
        assert_eq!(drain_frame(&mut line, &mut buf, gap).unwrap(), 5);
        assert_eq!(&buf[..5], &[0xFE, 0x04, 0x02, 0x01, 0x90]);
        assert_eq!(line.chunks.len(), 2);
    }

    #[test]
    fn test_drain_stops_when_buffer_full() {
        let mut line = FakeLine::default();
        line.chunks.push_back(vec![0xAA; 10]);

        let mut buf = [0u8; 7];
        assert_eq!(drain_frame(&mut line, &mut buf, Duration::from_secs(60)).unwrap(), 7);
        assert_eq!(line.chunks.front().map(Vec::len), Some(3));
    }

    #[test]
    fn test_drain_silent_line_returns_nothing() {
        let mut line = FakeLine::default();
        let mut buf = [0u8; 7];
        assert_eq!(drain_frame(&mut line, &mut buf, Duration::from_millis(1)).unwrap(), 0);
    }

    #[test]
    fn test_stats_success_rate() {
        let mut stats = TransportStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        stats.requests_sent = 4;
        stats.errors = 1;
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }
}
