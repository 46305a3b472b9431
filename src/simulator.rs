/// In-memory S8 device
///
/// `SimulatedSensor` implements [`SensorPort`] and answers requests the way
/// the sensor does: reads are served from its input and holding register
/// tables with a framed 7-byte response, writes are applied and echoed.
/// Frames with a bad checksum or a foreign address get no answer at all.
///
/// Faults can be injected per request (silence, corrupted checksum, short
/// frame, wrong address, wrong byte count) or at random with an error rate.

use std::collections::{HashMap, VecDeque};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, warn};
use rand::Rng;

use crate::error::SensorResult;
use crate::protocol::{
    check_crc, crc16, encode_read_response, Frame, FunctionCode, ANY_ADDRESS, REQUEST_FRAME_LEN,
};
use crate::registers::{
    AccessClass, Register, SpecialCommand, DEFAULT_ABC_PERIOD_HOURS, PWM_FULL_RANGE,
};
use crate::transport::SensorPort;

/// Number of acknowledgement reads before a calibration reports completion
pub const DEFAULT_CALIBRATION_POLLS: u32 = 3;

/// Misbehaviour applied to the next response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Do not answer
    Silent,
    /// Flip a bit in the trailing CRC
    CorruptChecksum,
    /// Send only the first N bytes
    Truncate(usize),
    /// Answer from address 0x01
    WrongAddress,
    /// Bump the byte count field and re-checksum
    WrongByteCount,
}

/// Simulated SenseAir S8 on an in-memory link
#[derive(Debug)]
pub struct SimulatedSensor {
    input_registers: HashMap<u16, u16>,
    holding_registers: HashMap<u16, u16>,
    /// Bytes written but not yet forming a whole request
    inbox: Vec<u8>,
    /// Response bytes waiting to be read
    outbox: VecDeque<u8>,
    faults: VecDeque<Fault>,
    silent: bool,
    error_rate: f32,
    co2_jitter: i16,
    calibration_polls: u32,
    calibration: Option<(SpecialCommand, u32)>,
    frames_received: u64,
    frames_rejected: u64,
    last_request: Option<Frame>,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensor {
    /// A healthy 2000 ppm sensor reading 400 ppm
    pub fn new() -> Self {
        let mut simulator = Self {
            input_registers: HashMap::new(),
            holding_registers: HashMap::new(),
            inbox: Vec::with_capacity(REQUEST_FRAME_LEN),
            outbox: VecDeque::new(),
            faults: VecDeque::new(),
            silent: false,
            error_rate: 0.0,
            co2_jitter: 0,
            calibration_polls: DEFAULT_CALIBRATION_POLLS,
            calibration: None,
            frames_received: 0,
            frames_rejected: 0,
            last_request: None,
        };
        simulator.initialize_default_data();
        simulator
    }

    fn initialize_default_data(&mut self) {
        for (register, value) in [
            (Register::MeterStatus, 0x0000),
            (Register::AlarmStatus, 0x0000),
            (Register::OutputStatus, 0x0002),
            (Register::SensorTypeIdHigh, 0x0000),
            (Register::SensorTypeIdLow, 0x0101),
            (Register::MemoryMapVersion, 0x0005),
            (Register::FirmwareVersion, 0x0102),
            (Register::SensorIdHigh, 0x0A1B),
            (Register::SensorIdLow, 0x2C3D),
        ] {
            self.set_input_register(register, value);
        }
        self.set_co2(400);

        self.set_holding_register(Register::Acknowledgement, 0x0000);
        self.set_holding_register(Register::AbcPeriod, DEFAULT_ABC_PERIOD_HOURS);
    }

    /// Set an input register value
    pub fn set_input_register(&mut self, register: Register, value: u16) {
        self.input_registers.insert(register.address(), value);
    }

    pub fn set_holding_register(&mut self, register: Register, value: u16) {
        self.holding_registers.insert(register.address(), value);
    }

    /// Current value of any mapped register
    pub fn register(&self, register: Register) -> Option<u16> {
        let table = match register.access() {
            AccessClass::Input => &self.input_registers,
            AccessClass::Holding => &self.holding_registers,
        };
        table.get(&register.address()).copied()
    }

    /// Set the CO2 reading and the matching PWM output of a 2000 ppm sensor
    pub fn set_co2(&mut self, ppm: i16) {
        self.set_input_register(Register::Co2, ppm as u16);
        let duty = (ppm.max(0) as u32 * PWM_FULL_RANGE as u32 / 2000).min(PWM_FULL_RANGE as u32);
        self.set_input_register(Register::PwmOutput, duty as u16);
    }

    /// Random ±`ppm` noise added to each CO2 read, capped at `i16::MAX`
    pub fn set_co2_jitter(&mut self, ppm: u16) {
        self.co2_jitter = ppm.min(i16::MAX as u16) as i16;
    }

    /// Stop answering anything until re-enabled
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Probability (0.0-1.0) that a response goes out with a corrupted CRC
    pub fn set_error_rate(&mut self, error_rate: f32) {
        self.error_rate = error_rate.clamp(0.0, 1.0);
    }

    /// Acknowledgement reads a calibration takes to complete
    pub fn set_calibration_polls(&mut self, polls: u32) {
        self.calibration_polls = polls;
    }

    /// Queue a fault for the next request that would be answered
    pub fn inject_fault(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Whole frames received, valid or not
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames dropped for a bad checksum, address or request
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn last_request(&self) -> Option<&Frame> {
        self.last_request.as_ref()
    }

    pub fn calibration_in_progress(&self) -> bool {
        self.calibration.is_some()
    }

    fn reject(&mut self, reason: &str) {
        self.frames_rejected += 1;
        warn!("simulated S8 ignored request: {}", reason);
    }

    fn process_frame(&mut self, frame: Frame) {
        self.frames_received += 1;
        self.last_request = Some(frame);

        if check_crc(&frame).is_err() {
            return self.reject("bad checksum");
        }
        if frame[0] != ANY_ADDRESS {
            return self.reject("foreign address");
        }
        let function = match FunctionCode::from_u8(frame[1]) {
            Ok(function) => function,
            Err(_) => return self.reject("unsupported function"),
        };
        let address = BigEndian::read_u16(&frame[2..4]);
        let value = BigEndian::read_u16(&frame[4..6]);

        let response = if function.is_read_function() {
            if value != 1 {
                return self.reject("multi-register read");
            }
            match self.read_value(function, address) {
                Some(data) => encode_read_response(function, data).to_vec(),
                None => return self.reject("unmapped register"),
            }
        } else {
            if Register::lookup(function, address).is_none() {
                return self.reject("unmapped register");
            }
            self.apply_write(address, value);
            frame.to_vec()
        };

        self.send(response);
    }

    fn read_value(&mut self, function: FunctionCode, address: u16) -> Option<u16> {
        match Register::lookup(function, address)? {
            Register::Co2 if self.co2_jitter > 0 => {
                let base = *self.input_registers.get(&address)? as i16;
                let jitter = self.co2_jitter;
                let noise = rand::thread_rng().gen_range(-jitter..=jitter);
                Some(base.saturating_add(noise) as u16)
            }
            Register::Acknowledgement => {
                self.advance_calibration();
                self.holding_registers.get(&address).copied()
            }
            register if register.access() == AccessClass::Input => {
                self.input_registers.get(&address).copied()
            }
            _ => self.holding_registers.get(&address).copied(),
        }
    }

    fn advance_calibration(&mut self) {
        if let Some((command, remaining)) = self.calibration.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                let mask = command.completion_mask();
                let address = Register::Acknowledgement.address();
                let flags = self.holding_registers.get(&address).copied().unwrap_or(0);
                self.holding_registers.insert(address, flags | mask);
                debug!("simulated calibration complete, flags 0x{:04X}", flags | mask);
                self.calibration = None;
            }
        }
    }

    fn apply_write(&mut self, address: u16, value: u16) {
        match Register::lookup(FunctionCode::WriteSingleRegister, address) {
            Some(Register::SpecialCommand) => {
                let command = [SpecialCommand::BackgroundCalibration, SpecialCommand::ZeroCalibration]
                    .into_iter()
                    .find(|command| command.value() == value);
                match command {
                    Some(command) => {
                        debug!("simulated calibration started: {:?}", command);
                        self.calibration = Some((command, self.calibration_polls.max(1)));
                    }
                    None => debug!("simulated S8 ignores special command 0x{:04X}", value),
                }
            }
            _ => {
                self.holding_registers.insert(address, value);
            }
        }
    }

    fn send(&mut self, mut response: Vec<u8>) {
        let fault = self.faults.pop_front();
        if self.silent || fault == Some(Fault::Silent) {
            debug!("simulated S8 stays silent");
            return;
        }

        match fault {
            Some(Fault::CorruptChecksum) => corrupt_checksum(&mut response),
            Some(Fault::Truncate(len)) => response.truncate(len),
            Some(Fault::WrongAddress) => {
                response[0] = 0x01;
                rechecksum(&mut response);
            }
            Some(Fault::WrongByteCount) => {
                response[2] = response[2].wrapping_add(2);
                rechecksum(&mut response);
            }
            Some(Fault::Silent) | None => {
                if self.error_rate > 0.0 && rand::random::<f32>() < self.error_rate {
                    corrupt_checksum(&mut response);
                }
            }
        }

        self.outbox.extend(response);
    }
}

fn corrupt_checksum(frame: &mut [u8]) {
    if let Some(last) = frame.last_mut() {
        *last ^= 0x01;
    }
}

fn rechecksum(frame: &mut [u8]) {
    let data_len = frame.len() - 2;
    let crc = crc16(&frame[..data_len]);
    LittleEndian::write_u16(&mut frame[data_len..], crc);
}

impl SensorPort for SimulatedSensor {
    fn write(&mut self, bytes: &[u8]) -> SensorResult<()> {
        self.inbox.extend_from_slice(bytes);
        while self.inbox.len() >= REQUEST_FRAME_LEN {
            let mut frame = [0u8; REQUEST_FRAME_LEN];
            frame.copy_from_slice(&self.inbox[..REQUEST_FRAME_LEN]);
            self.inbox.drain(..REQUEST_FRAME_LEN);
            self.process_frame(frame);
        }
        Ok(())
    }

    fn flush(&mut self) -> SensorResult<()> {
        Ok(())
    }

    fn bytes_available(&mut self) -> SensorResult<usize> {
        Ok(self.outbox.len())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> SensorResult<usize> {
        let count = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_read_response, encode_request};
    use crate::registers::Acknowledgement;

    fn exchange(sim: &mut SimulatedSensor, request: &Frame) -> Vec<u8> {
        sim.write(request).unwrap();
        let mut buf = [0u8; 8];
        let count = sim.read_available(&mut buf).unwrap();
        buf[..count].to_vec()
    }

    #[test]
    fn test_read_co2() {
        let mut sim = SimulatedSensor::new();
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();
        assert_eq!(exchange(&mut sim, &request), vec![0xFE, 0x04, 0x02, 0x01, 0x90, 0xAC, 0xD8]);
        assert_eq!(sim.frames_received(), 1);
    }

    #[test]
    fn test_write_is_echoed_and_applied() {
        let mut sim = SimulatedSensor::new();
        let request = encode_request(FunctionCode::WriteSingleRegister, 0x0020, 0).unwrap();
        assert_eq!(exchange(&mut sim, &request), request.to_vec());
        assert_eq!(sim.register(Register::AbcPeriod), Some(0));
    }

    #[test]
    fn test_bad_frames_get_no_answer() {
        let mut sim = SimulatedSensor::new();
        let mut request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();
        request[7] ^= 0xFF;
        assert!(exchange(&mut sim, &request).is_empty());

        let multi = {
            let mut frame = [0xFE, 0x04, 0x00, 0x03, 0x00, 0x02, 0, 0];
            rechecksum(&mut frame);
            frame
        };
        assert!(exchange(&mut sim, &multi).is_empty());
        assert_eq!(sim.frames_rejected(), 2);
    }

    #[test]
    fn test_split_writes_reassemble() {
        let mut sim = SimulatedSensor::new();
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();
        sim.write(&request[..3]).unwrap();
        assert_eq!(sim.bytes_available().unwrap(), 0);
        sim.write(&request[3..]).unwrap();
        assert_eq!(sim.bytes_available().unwrap(), 7);
    }

    #[test]
    fn test_injected_faults() {
        let mut sim = SimulatedSensor::new();
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();

        sim.inject_fault(Fault::Truncate(4));
        assert_eq!(exchange(&mut sim, &request).len(), 4);

        sim.inject_fault(Fault::WrongAddress);
        let response = exchange(&mut sim, &request);
        assert!(check_crc(&response).is_ok());
        assert!(decode_read_response(&response).is_err());

        sim.inject_fault(Fault::CorruptChecksum);
        assert!(check_crc(&exchange(&mut sim, &request)).is_err());

        sim.inject_fault(Fault::Silent);
        assert!(exchange(&mut sim, &request).is_empty());

        assert_eq!(decode_read_response(&exchange(&mut sim, &request)).unwrap(), 400);
    }

    #[test]
    fn test_calibration_completes_after_polls() {
        let mut sim = SimulatedSensor::new();
        sim.set_calibration_polls(2);
        let command = encode_request(FunctionCode::WriteSingleRegister, 0x0001, 0x7C06).unwrap();
        exchange(&mut sim, &command);
        assert!(sim.calibration_in_progress());

        let poll = encode_request(FunctionCode::ReadHoldingRegisters, 0x0000, 1).unwrap();
        let first = decode_read_response(&exchange(&mut sim, &poll)).unwrap();
        assert!(!Acknowledgement(first).background_calibration_done());
        let second = decode_read_response(&exchange(&mut sim, &poll)).unwrap();
        assert!(Acknowledgement(second).background_calibration_done());
        assert!(!sim.calibration_in_progress());
    }

    #[test]
    fn test_co2_jitter_bounds() {
        let mut sim = SimulatedSensor::new();
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();

        sim.set_co2_jitter(5);
        for _ in 0..20 {
            let co2 = decode_read_response(&exchange(&mut sim, &request)).unwrap() as i16;
            assert!((395..=405).contains(&co2), "co2 {}", co2);
        }

        // Out of i16 range is capped rather than wrapping to an empty range
        sim.set_co2_jitter(40000);
        for _ in 0..20 {
            assert!(decode_read_response(&exchange(&mut sim, &request)).is_ok());
        }
    }

    #[test]
    fn test_error_rate_corrupts_checksum() {
        let mut sim = SimulatedSensor::new();
        let request = encode_request(FunctionCode::ReadInputRegisters, 0x0003, 1).unwrap();

        sim.set_error_rate(1.0);
        let response = exchange(&mut sim, &request);
        assert_eq!(response.len(), 7);
        assert!(check_crc(&response).is_err());

        sim.set_error_rate(-3.0);
        assert!(check_crc(&exchange(&mut sim, &request)).is_ok());
    }

    #[test]
    fn test_co2_sets_pwm() {
        let mut sim = SimulatedSensor::new();
        sim.set_co2(2000);
        assert_eq!(sim.register(Register::PwmOutput), Some(PWM_FULL_RANGE));
        sim.set_co2(-5);
        assert_eq!(sim.register(Register::PwmOutput), Some(0));
    }
}
