//! In-process tracking device
//!
//! [`SimulatedDevice`] implements [`Transport`] and answers the CRC-framed
//! command set the way a tracker does: it allocates port handles, reports
//! poses or missing tools in TX replies, and tracks its own mode. A cloned
//! [`DeviceControl`] handle moves tools around and injects faults while a
//! tracker owns the device.
//!
//! # Examples
//!
//! ```
//! use igt_tracker::io::simulator::SimulatedDevice;
//! use igt_tracker::io::transport::{TransferParameters, Transport};
//!
//! let (mut device, control) = SimulatedDevice::new();
//! device.open_port(&TransferParameters::default())?;
//! device.write(b"INIT:E3A5\r", std::time::Duration::from_millis(10))?;
//!
//! let mut reply = Vec::new();
//! device.read(&mut reply, 64, Some(b'\r'), std::time::Duration::from_millis(10))?;
//! assert_eq!(reply, b"OKAYA896\r");
//! assert_eq!(control.commands(), vec!["INIT:".to_string()]);
//! # Ok::<(), std::io::Error>(())
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::io::transport::{TransferParameters, Transport};
use crate::protocol::command::{BaudRate, TrackingPriority, REPLY_TERMINATOR};
use crate::protocol::crc::{calculate_crc, verify_crc};
use crate::protocol::tx::{HandleRecord, PortStatus, RawTransform, TxReply};
use crate::tracking::registry::PortHandle;

/// Text returned for every VER query
pub const SIMULATED_FIRMWARE: &str = "Simulated Position Sensor\nFirmware 2.0.0\n";

/// First handle handed out by PHRQ
const FIRST_HANDLE: PortHandle = 0x0A;

/// One injected fault, consumed by the next command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with `ERRORnn` instead of executing
    DeviceError(u8),
    /// Execute but never answer (the read times out)
    Stall,
    /// Execute and answer only after the read deadline has passed
    Late,
    /// Answer with a broken CRC
    Corrupt,
    /// Fail the write itself at the transport level
    Io,
}

#[derive(Debug, Clone, Default)]
struct SimPort {
    initialized: bool,
    enabled: bool,
    priority: Option<TrackingPriority>,
    pose: Option<RawTransform>,
    status_override: Option<u32>,
}

impl SimPort {
    fn port_status(&self) -> u32 {
        if let Some(bits) = self.status_override {
            return bits;
        }
        let mut bits = PortStatus::TOOL_IN_PORT;
        if self.initialized {
            bits |= PortStatus::INITIALIZED;
        }
        if self.enabled {
            bits |= PortStatus::ENABLED;
        }
        bits
    }
}

#[derive(Debug)]
struct DeviceState {
    open: bool,
    refuse_open: bool,
    fail_update: bool,
    line_baud: BaudRate,
    device_baud: BaudRate,
    initialized: bool,
    tracking: bool,
    next_handle: PortHandle,
    ports: BTreeMap<PortHandle, SimPort>,
    parameters: BTreeMap<String, String>,
    frame: u32,
    faults: VecDeque<Fault>,
    command_failures: BTreeMap<String, u8>,
    commands: Vec<String>,
    outbox: VecDeque<u8>,
    late: Vec<u8>,
    discards: usize,
    sleeps: Vec<Duration>,
}

impl Default for DeviceState {
    fn default() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("Device.Type".to_string(), "0".to_string());
        parameters.insert("Param.GPIO.Configure.Value.4".to_string(), "0".to_string());
        Self {
            open: false,
            refuse_open: false,
            fail_update: false,
            line_baud: BaudRate::B9600,
            device_baud: BaudRate::B9600,
            initialized: false,
            tracking: false,
            next_handle: FIRST_HANDLE,
            ports: BTreeMap::new(),
            parameters,
            frame: 0,
            faults: VecDeque::new(),
            command_failures: BTreeMap::new(),
            commands: Vec::new(),
            outbox: VecDeque::new(),
            late: Vec::new(),
            discards: 0,
            sleeps: Vec::new(),
        }
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated tracker speaking the device protocol
#[derive(Debug)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

/// Test-side handle onto a [`SimulatedDevice`]
#[derive(Debug, Clone)]
pub struct DeviceControl {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Create a powered-off device and its control handle
    pub fn new() -> (Self, DeviceControl) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        (
            Self {
                state: state.clone(),
            },
            DeviceControl { state },
        )
    }
}

impl DeviceControl {
    /// Place a tool at a pose (device order `qw qx qy qz tx ty tz err`)
    pub fn set_pose(&self, handle: PortHandle, transform: RawTransform) {
        lock(&self.state).ports.entry(handle).or_default().pose = Some(transform);
    }

    /// Take a tool out of view
    pub fn set_missing(&self, handle: PortHandle) {
        if let Some(port) = lock(&self.state).ports.get_mut(&handle) {
            port.pose = None;
        }
    }

    /// Report fixed port status bits for a handle instead of the computed ones
    pub fn set_port_status(&self, handle: PortHandle, bits: Option<u32>) {
        lock(&self.state).ports.entry(handle).or_default().status_override = bits;
    }

    /// Pull a tool out without telling the host
    ///
    /// The device may hand the handle out again on the next PHRQ.
    pub fn unplug(&self, handle: PortHandle) {
        let mut state = lock(&self.state);
        state.ports.remove(&handle);
        state.next_handle = state.next_handle.min(handle);
    }

    /// Plug a tool into a fixed port handle
    pub fn insert_port(&self, handle: PortHandle) {
        lock(&self.state).ports.entry(handle).or_default();
    }

    /// Set the value returned by `GET:<name>`
    pub fn set_parameter(&self, name: &str, value: &str) {
        lock(&self.state)
            .parameters
            .insert(name.to_string(), value.to_string());
    }

    /// Queue a fault for the next command
    pub fn inject(&self, fault: Fault) {
        lock(&self.state).faults.push_back(fault);
    }

    /// Answer the next command with `ERRORnn`
    pub fn fail_next(&self, code: u8) {
        self.inject(Fault::DeviceError(code));
    }

    /// Answer the next command with this name with `ERRORnn`
    pub fn fail_command(&self, name: &str, code: u8) {
        lock(&self.state)
            .command_failures
            .insert(name.to_string(), code);
    }

    /// Make `open_port` fail
    pub fn refuse_open(&self, refuse: bool) {
        lock(&self.state).refuse_open = refuse;
    }

    /// Make `update_parameters` fail
    pub fn fail_update(&self, fail: bool) {
        lock(&self.state).fail_update = fail;
    }

    /// Every command received so far as `NAME:ARGS`
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Number of received commands with the given name
    pub fn command_count(&self, name: &str) -> usize {
        let prefix = format!("{}:", name);
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Forget the command log
    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }

    /// True while the device is in tracking mode
    pub fn is_tracking(&self) -> bool {
        lock(&self.state).tracking
    }

    /// True while the host side has the channel open
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Baud rate negotiated with COMM
    pub fn device_baud(&self) -> BaudRate {
        lock(&self.state).device_baud
    }

    /// Baud rate the host last applied to the line
    pub fn line_baud(&self) -> BaudRate {
        lock(&self.state).line_baud
    }

    /// Allocated port handles
    pub fn handles(&self) -> Vec<PortHandle> {
        lock(&self.state).ports.keys().copied().collect()
    }

    /// True if the handle is allocated and enabled
    pub fn is_enabled(&self, handle: PortHandle) -> bool {
        lock(&self.state)
            .ports
            .get(&handle)
            .map(|p| p.enabled)
            .unwrap_or(false)
    }

    /// Number of times the host discarded unread input
    pub fn discards(&self) -> usize {
        lock(&self.state).discards
    }

    /// Pauses requested through the session
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }
}

impl DeviceState {
    fn handle(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let body = frame.strip_suffix(&[REPLY_TERMINATOR]).unwrap_or(frame);
        if body.len() < 5 {
            return Some(framed("ERROR03", false));
        }
        let (text, crc) = body.split_at(body.len() - 4);
        let text = String::from_utf8_lossy(text).into_owned();
        self.commands.push(text.clone());

        let crc_ok = std::str::from_utf8(crc)
            .ok()
            .and_then(|c| u16::from_str_radix(c, 16).ok())
            .map(|c| verify_crc(text.as_bytes(), c).is_ok())
            .unwrap_or(false);
        if !crc_ok {
            return Some(framed("ERROR04", false));
        }

        let fault = self.faults.pop_front();
        if let Some(Fault::DeviceError(code)) = fault {
            return Some(framed(&format!("ERROR{:02X}", code), false));
        }

        let (name, args) = text.split_once(':').unwrap_or((text.as_str(), ""));
        if let Some(code) = self.command_failures.remove(name) {
            return Some(framed(&format!("ERROR{:02X}", code), false));
        }
        let reply = self.execute(name, args);
        match fault {
            Some(Fault::Stall) => None,
            Some(Fault::Late) => {
                self.late = framed(&reply, false);
                None
            }
            Some(Fault::Corrupt) => Some(framed(&reply, true)),
            _ => Some(framed(&reply, false)),
        }
    }

    fn execute(&mut self, name: &str, args: &str) -> String {
        match name {
            "RESET" => {
                self.initialized = false;
                self.tracking = false;
                self.device_baud = BaudRate::B9600;
                "RESET".to_string()
            }
            "INIT" => {
                self.initialized = true;
                okay()
            }
            "COMM" => match parse_comm(args) {
                Some(rate) => {
                    self.device_baud = rate;
                    okay()
                }
                None => error(0x06),
            },
            "VER" => SIMULATED_FIRMWARE.to_string(),
            "TSTART" if !self.initialized => error(0x10),
            "TSTART" => {
                self.tracking = true;
                okay()
            }
            "TSTOP" => {
                self.tracking = false;
                okay()
            }
            "PHRQ" if self.tracking => error(0x0C),
            "PHRQ" => {
                if self.next_handle > 0xFF {
                    return error(0x30);
                }
                while self.ports.contains_key(&self.next_handle) {
                    self.next_handle += 1;
                }
                let handle = self.next_handle;
                self.next_handle += 1;
                self.ports.insert(handle, SimPort::default());
                format!("{:02X}", handle)
            }
            "PINIT" | "PENA" | "PDIS" | "PHF" => self.port_command(name, args),
            "TX" if !self.tracking => error(0x0C),
            "TX" => self.tx_reply(args),
            "GET" => match self.parameters.get(args) {
                Some(value) => format!("{}={}", args, value),
                None => error(0x23),
            },
            _ => error(0x01),
        }
    }

    fn port_command(&mut self, name: &str, args: &str) -> String {
        let Some(handle) = args
            .get(..2)
            .and_then(|h| PortHandle::from_str_radix(h, 16).ok())
        else {
            return error(0x07);
        };
        let Some(port) = self.ports.get_mut(&handle) else {
            return error(0x2E);
        };

        match name {
            "PINIT" => port.initialized = true,
            "PENA" if !port.initialized => return error(0x0E),
            "PENA" => {
                port.priority = match &args[2..] {
                    "D" => Some(TrackingPriority::Dynamic),
                    "S" => Some(TrackingPriority::Static),
                    "B" => Some(TrackingPriority::ButtonBox),
                    _ => return error(0x09),
                };
                port.enabled = true;
            }
            "PDIS" => port.enabled = false,
            _ => {
                self.ports.remove(&handle);
            }
        }
        okay()
    }

    fn tx_reply(&mut self, args: &str) -> String {
        let options = u16::from_str_radix(args, 16).unwrap_or(0x0001);
        let include_out_of_volume = options & 0x0800 != 0;
        self.frame = self.frame.wrapping_add(1);

        let records = self
            .ports
            .iter()
            .filter(|(_, port)| port.enabled)
            .map(|(&handle, port)| {
                let bits = port.port_status();
                let hidden = !include_out_of_volume && bits & PortStatus::OUT_OF_VOLUME != 0;
                match port.pose {
                    Some(pose) if !hidden => HandleRecord::valid(handle, pose, bits, self.frame),
                    _ => HandleRecord::missing(handle, bits, self.frame),
                }
            })
            .collect();

        TxReply {
            records,
            system_status: 0,
        }
        .encode()
    }
}

fn parse_comm(args: &str) -> Option<BaudRate> {
    let bytes = args.as_bytes();
    if bytes.len() != 5 {
        return None;
    }
    let rate = match bytes[0] {
        b'0' => BaudRate::B9600,
        b'1' => BaudRate::B14400,
        b'2' => BaudRate::B19200,
        b'3' => BaudRate::B38400,
        b'4' => BaudRate::B57600,
        b'5' => BaudRate::B115200,
        b'6' => BaudRate::B921600,
        b'7' => BaudRate::B1228739,
        _ => return None,
    };
    Some(rate)
}

fn okay() -> String {
    "OKAY".to_string()
}

fn error(code: u8) -> String {
    format!("ERROR{:02X}", code)
}

fn framed(payload: &str, corrupt: bool) -> Vec<u8> {
    let mut crc = calculate_crc(payload.as_bytes());
    if corrupt {
        crc ^= 0xFFFF;
    }
    let mut out = format!("{}{:04X}", payload, crc).into_bytes();
    out.push(REPLY_TERMINATOR);
    out
}

impl Transport for SimulatedDevice {
    fn open_port(&mut self, params: &TransferParameters) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.refuse_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "simulated device unplugged"));
        }
        state.open = true;
        state.line_baud = params.baud_rate;
        state.outbox.clear();
        state.late.clear();
        Ok(())
    }

    fn update_parameters(&mut self, params: &TransferParameters) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.fail_update {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "line settings rejected"));
        }
        state.line_baud = params.baud_rate;
        Ok(())
    }

    fn close_port(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.open = false;
        state.outbox.clear();
        state.late.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulated device closed"));
        }
        if state.faults.front() == Some(&Fault::Io) {
            state.faults.pop_front();
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated line failure"));
        }
        if let Some(reply) = state.handle(data) {
            trace!(reply = %String::from_utf8_lossy(&reply).trim_end(), "simulator reply");
            state.outbox.extend(reply);
        }
        Ok(data.len())
    }

    fn read(
        &mut self,
        buf: &mut Vec<u8>,
        max: usize,
        terminator: Option<u8>,
        _timeout: Duration,
    ) -> io::Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulated device closed"));
        }
        let mut taken = 0;
        while taken < max {
            let Some(byte) = state.outbox.pop_front() else {
                // a late reply lands once the reader has given up
                let late = std::mem::take(&mut state.late);
                state.outbox.extend(late);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "device did not answer"));
            };
            buf.push(byte);
            taken += 1;
            if Some(byte) == terminator {
                break;
            }
        }
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulated device closed"));
        }
        state.outbox.clear();
        state.discards += 1;
        Ok(())
    }

    fn sleep(&mut self, duration: Duration) {
        lock(&self.state).sleeps.push(duration);
    }

    fn describe(&self) -> String {
        "simulator://tracker".to_string()
    }
}
