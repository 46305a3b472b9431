/// Callback-based packet logging
///
/// Applications that want to see S8 traffic without installing a global
/// logger hand a `CallbackLogger` to the request engine. Frames can be shown
/// as raw hex, interpreted against the register map, or both.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::protocol::{Frame, FunctionCode, READ_RESPONSE_LEN};
use crate::registers::Register;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for packet display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Hex bytes only
    Raw,
    /// Register names and decoded values
    Interpreted,
    /// Interpreted at the given level, raw at debug
    Both,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with timestamped console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => {
                    eprintln!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
                LogLevel::Info | LogLevel::Debug => {
                    println!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log packet data with hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!("{} packet ({} bytes): {}", direction, data.len(), hex_dump(data));
        self.log(level, &message);
    }

    /// Log an outgoing request frame
    pub fn log_request(&self, frame: &Frame) {
        let raw = || format!("S8 Request -> Raw: {}", hex_dump(frame));
        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpret_request(frame)),
            LoggingMode::Both => {
                self.info(&interpret_request(frame));
                self.debug(&raw());
            }
        }
    }

    /// Log the bytes received for `request`
    pub fn log_response(&self, request: &Frame, response: &[u8]) {
        let raw = || format!("S8 Response <- Raw: {}", hex_dump(response));
        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpret_response(request, response)),
            LoggingMode::Both => {
                self.info(&interpret_response(request, response));
                self.debug(&raw());
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Space separated uppercase hex
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn register_label(function: FunctionCode, address: u16) -> String {
    match Register::lookup(function, address) {
        Some(register) => register.to_string(),
        None => format!("unmapped register 0x{:04X}", address),
    }
}

fn interpret_request(frame: &Frame) -> String {
    let address = BigEndian::read_u16(&frame[2..4]);
    let value = BigEndian::read_u16(&frame[4..6]);
    match FunctionCode::from_u8(frame[1]) {
        Ok(function) if function.is_read_function() => format!(
            "S8 Request -> {}, Register: {}, Quantity: {}",
            function,
            register_label(function, address),
            value
        ),
        Ok(function) => {
            let shown = match Register::lookup(function, address) {
                Some(register) => register.describe_value(value),
                None => format!("0x{:04X}", value),
            };
            format!(
                "S8 Request -> {}, Register: {}, Value: {}",
                function,
                register_label(function, address),
                shown
            )
        }
        Err(_) => format!("S8 Request -> Unknown function 0x{:02X}: {}", frame[1], hex::encode(frame)),
    }
}

fn interpret_response(request: &Frame, response: &[u8]) -> String {
    if response.is_empty() {
        return "S8 Response <- No data".to_string();
    }

    let address = BigEndian::read_u16(&request[2..4]);
    match FunctionCode::from_u8(request[1]) {
        Ok(function) if function.is_read_function() && response.len() == READ_RESPONSE_LEN => {
            let value = BigEndian::read_u16(&response[3..5]);
            let shown = match Register::lookup(function, address) {
                Some(register) => register.describe_value(value),
                None => format!("0x{:04X}", value),
            };
            format!(
                "S8 Response <- {}, Byte count: {}, {} = {}",
                function,
                response[2],
                register_label(function, address),
                shown
            )
        }
        Ok(function) if function.is_write_function() && response == &request[..] => {
            format!("S8 Response <- Write echo for {}", register_label(function, address))
        }
        _ => format!(
            "S8 Response <- Unexpected {} bytes: {}",
            response.len(),
            hex::encode(response)
        ),
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_read_response, encode_request};
    use std::sync::Mutex;

    fn capture(mode: LoggingMode, level: LogLevel) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: LogCallback = Box::new(move |level, message| {
            sink.lock().unwrap().push((level, message.to_string()));
        });
        (CallbackLogger::with_mode(Some(callback), level, mode), lines)
    }

    #[test]
    fn test_level_filtering() {
        let (logger, lines) = capture(LoggingMode::Raw, LogLevel::Warn);
        logger.debug("hidden");
        logger.info("hidden");
        logger.warn("shown");
        logger.error("shown");
        assert_eq!(lines.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_disabled_logger() {
        let logger = CallbackLogger::disabled();
        assert!(!logger.is_enabled());
        logger.error("nothing happens");
    }

    #[test]
    fn test_interpreted_co2_exchange() {
        let (logger, lines) = capture(LoggingMode::Interpreted, LogLevel::Info);
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();
        let response = encode_read_response(FunctionCode::ReadInputRegisters, 400);
        logger.log_request(&request);
        logger.log_response(&request, &response);

        let lines = lines.lock().unwrap();
        assert!(lines[0].1.contains("CO2 (IR 0x0003)"));
        assert!(lines[1].1.contains("400 ppm"));
    }

    #[test]
    fn test_raw_and_both_modes() {
        let request = encode_request(FunctionCode::WriteSingleRegister, 0x0020, 180).unwrap();

        let (logger, lines) = capture(LoggingMode::Raw, LogLevel::Debug);
        logger.log_request(&request);
        assert_eq!(lines.lock().unwrap()[0].1, "S8 Request -> Raw: FE 06 00 20 00 B4 9C 78");

        let (logger, lines) = capture(LoggingMode::Both, LogLevel::Debug);
        logger.log_request(&request);
        logger.log_response(&request, &request);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].1.contains("180 hours"));
        assert_eq!(lines[1].0, LogLevel::Debug);
        assert!(lines[2].1.contains("Write echo for ABC period"));
    }

    #[test]
    fn test_malformed_response_falls_back_to_hex() {
        let (logger, lines) = capture(LoggingMode::Interpreted, LogLevel::Info);
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();
        logger.log_response(&request, &[0xFE, 0x04, 0x02]);
        logger.log_response(&request, &[]);
        let lines = lines.lock().unwrap();
        assert!(lines[0].1.contains("fe0402"));
        assert!(lines[1].1.contains("No data"));
    }

    #[test]
    fn test_log_packet_respects_level() {
        let (logger, lines) = capture(LoggingMode::Raw, LogLevel::Info);
        logger.log_packet(LogLevel::Info, "send", &[0xFE, 0x04, 0x02]);
        logger.log_packet(LogLevel::Debug, "receive", &[0xFE]);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, "send packet (3 bytes): FE 04 02");
    }

    #[test]
    fn test_logger_macros() {
        assert!(crate::console_logger!().is_enabled());

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = crate::custom_logger!(
            Box::new(move |_, message: &str| sink.lock().unwrap().push(message.to_string())),
            LogLevel::Debug,
            LoggingMode::Raw
        );
        assert_eq!(logger.mode(), LoggingMode::Raw);
        logger.debug("seen");
        assert_eq!(*lines.lock().unwrap(), vec!["seen".to_string()]);

        let quiet = crate::custom_logger!(Box::new(|_, _: &str| {}));
        assert_eq!(quiet.mode(), LoggingMode::Interpreted);
    }
}
