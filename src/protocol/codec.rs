//! Command codec
//!
//! [`CommandCodec`] sends one [`Command`] at a time over a
//! [`TransportSession`] and waits for its reply; the protocol is strictly
//! request/response. After every command the device error register is
//! checked and a nonzero value becomes [`ProtocolError::Device`].
//!
//! An exchange that timed out or produced an unreadable or mismatched reply
//! leaves the line out of step: the device may still answer later. The next
//! command first discards whatever input is waiting so its reply is the one
//! it reads.

use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, Result, TrackerError};
use crate::io::capture::encode_bytes;
use crate::io::session::TransportSession;
use crate::io::transport::Transport;
use crate::protocol::command::{
    BaudRate, Command, Handshake, ReplyOptions, TrackingPriority, VersionTarget,
};
use crate::protocol::reply::{error_string, parse_reply, Reply};
use crate::protocol::tx::TxReply;
use crate::tracking::registry::PortHandle;

/// Encodes commands and decodes replies over a session
#[derive(Debug)]
pub struct CommandCodec<T: Transport> {
    session: TransportSession<T>,
    error_register: u8,
    resync: bool,
}

impl<T: Transport> CommandCodec<T> {
    pub fn new(session: TransportSession<T>) -> Self {
        Self {
            session,
            error_register: 0,
            resync: false,
        }
    }

    /// The underlying session
    pub fn session(&self) -> &TransportSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TransportSession<T> {
        &mut self.session
    }

    /// Error code left by the last command (0 = no error)
    pub fn error_register(&self) -> u8 {
        self.error_register
    }

    /// Send one command and return its reply
    ///
    /// # Errors
    ///
    /// - [`TransportError`](crate::error::TransportError) if the write or read failed or timed out
    /// - [`ProtocolError::Device`] if the device answered `ERRORnn`
    /// - [`ProtocolError::BadCrc`] / [`ProtocolError::Malformed`] for unreadable replies
    pub fn execute(&mut self, command: &Command) -> Result<Reply> {
        self.error_register = 0;
        if self.resync {
            self.session.discard_input()?;
            self.resync = false;
            debug!(command = command.name(), "discarded stale input");
        }

        let result = self.exchange(command);
        if let Err(err) = &result {
            self.resync = leaves_line_out_of_step(err);
        }
        result
    }

    /// True while the next command will discard pending input first
    pub fn needs_resync(&self) -> bool {
        self.resync
    }

    fn exchange(&mut self, command: &Command) -> Result<Reply> {
        let frame = command.encode();
        trace!("-> {}", encode_bytes(&frame));
        self.session.write(&frame)?;

        let record = self.session.read_record()?;
        trace!("<- {}", encode_bytes(&record));
        let reply = parse_reply(&record).map_err(|err| {
            warn!(command = command.name(), "unreadable reply: {}", err);
            err
        })?;

        self.error_register = reply.error_code();
        self.check_error(command)?;

        if let Reply::Warning(code) = reply {
            debug!(command = command.name(), "device warning {:#04X}", code);
        }
        Ok(reply)
    }

    fn check_error(&self, command: &Command) -> std::result::Result<(), ProtocolError> {
        if self.error_register == 0 {
            return Ok(());
        }
        warn!(
            command = command.name(),
            code = %format!("{:#04X}", self.error_register),
            "{}",
            error_string(self.error_register)
        );
        Err(ProtocolError::Device {
            code: self.error_register,
        })
    }

    fn execute_okay(&mut self, command: &Command) -> Result<()> {
        match self.execute(command)? {
            Reply::Okay | Reply::Warning(_) => Ok(()),
            other => Err(self.unexpected(command, &other)),
        }
    }

    fn execute_data(&mut self, command: &Command) -> Result<String> {
        match self.execute(command)? {
            Reply::Data(text) => Ok(text),
            other => Err(self.unexpected(command, &other)),
        }
    }

    /// A well-formed reply of the wrong kind belongs to some other command
    fn unexpected(&mut self, command: &Command, reply: &Reply) -> TrackerError {
        warn!(command = command.name(), "reply out of step: {:?}", reply);
        self.resync = true;
        ProtocolError::Malformed(format!("unexpected reply to {}: {:?}", command.name(), reply)).into()
    }

    /// Soft reset; the device answers `RESET`
    pub fn reset(&mut self) -> Result<()> {
        match self.execute(&Command::Reset)? {
            Reply::Reset | Reply::Okay => Ok(()),
            other => Err(self.unexpected(&Command::Reset, &other)),
        }
    }

    pub fn init(&mut self) -> Result<()> {
        self.execute_okay(&Command::Init)
    }

    /// Switch the device's serial parameters
    ///
    /// The reply still arrives at the old rate; the caller reconfigures the
    /// host side afterwards.
    pub fn comm(&mut self, baud_rate: BaudRate, handshake: Handshake) -> Result<()> {
        self.execute_okay(&Command::Comm {
            baud_rate,
            handshake,
        })
    }

    /// Firmware/version text
    pub fn version(&mut self, target: VersionTarget) -> Result<String> {
        self.execute_data(&Command::Ver(target))
    }

    pub fn start_tracking(&mut self) -> Result<()> {
        self.execute_okay(&Command::TStart)
    }

    pub fn stop_tracking(&mut self) -> Result<()> {
        self.execute_okay(&Command::TStop)
    }

    /// Request a new port handle
    pub fn request_handle(&mut self, selector: &str) -> Result<PortHandle> {
        let command = Command::Phrq {
            selector: selector.to_string(),
        };
        let text = self.execute_data(&command)?;
        text.get(..2)
            .and_then(|hex| PortHandle::from_str_radix(hex, 16).ok())
            .ok_or_else(|| {
                ProtocolError::Malformed(format!("bad port handle reply '{}'", text)).into()
            })
    }

    pub fn init_handle(&mut self, handle: PortHandle) -> Result<()> {
        self.execute_okay(&Command::Pinit(handle))
    }

    pub fn enable_handle(&mut self, handle: PortHandle, priority: TrackingPriority) -> Result<()> {
        self.execute_okay(&Command::Pena { handle, priority })
    }

    pub fn disable_handle(&mut self, handle: PortHandle) -> Result<()> {
        self.execute_okay(&Command::Pdis(handle))
    }

    pub fn free_handle(&mut self, handle: PortHandle) -> Result<()> {
        self.execute_okay(&Command::Phf(handle))
    }

    /// One composite status + transform query for all enabled handles
    pub fn query_transforms(&mut self, options: ReplyOptions) -> Result<TxReply> {
        let text = self.execute_data(&Command::Tx(options))?;
        Ok(TxReply::parse(&text)?)
    }

    /// Read a user parameter; returns the value part of `name=value`
    pub fn get_parameter(&mut self, name: &str) -> Result<String> {
        let command = Command::Get {
            parameter: name.to_string(),
        };
        let text = self.execute_data(&command)?;
        match text.split_once('=') {
            Some((_, value)) => Ok(value.to_string()),
            None => Ok(text),
        }
    }
}

/// Failures after which a late or partial reply may still be on the line
fn leaves_line_out_of_step(err: &TrackerError) -> bool {
    matches!(
        err,
        TrackerError::Protocol(ProtocolError::BadCrc { .. } | ProtocolError::Malformed(_))
    ) || err.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulator::{DeviceControl, Fault, SimulatedDevice};

    fn codec() -> (CommandCodec<SimulatedDevice>, DeviceControl) {
        let (device, control) = SimulatedDevice::new();
        let mut session = TransportSession::new(device).unwrap();
        session.open().unwrap();
        (CommandCodec::new(session), control)
    }

    #[test]
    fn test_device_error_sets_register() {
        let (mut codec, control) = codec();
        control.fail_next(0x0C);
        let err = codec.init().unwrap_err();
        assert_eq!(err.device_code(), Some(0x0C));
        assert_eq!(codec.error_register(), 0x0C);

        // register is cleared by the next command
        codec.init().unwrap();
        assert_eq!(codec.error_register(), 0);
    }

    #[test]
    fn test_bring_up_commands() {
        let (mut codec, control) = codec();
        codec.reset().unwrap();
        let version = codec.version(VersionTarget::ControlFirmwareEnhanced).unwrap();
        assert!(version.contains("Firmware"));
        codec.comm(BaudRate::B57600, Handshake::None).unwrap();
        codec.init().unwrap();
        assert_eq!(control.device_baud(), BaudRate::B57600);
        assert_eq!(
            control.commands(),
            vec!["RESET:", "VER:4", "COMM:40000", "INIT:"]
        );
    }

    #[test]
    fn test_handle_lifecycle() {
        let (mut codec, control) = codec();
        codec.init().unwrap();
        let handle = codec.request_handle("*********1****").unwrap();
        assert_eq!(handle, 0x0A);
        codec.init_handle(handle).unwrap();
        codec.enable_handle(handle, TrackingPriority::Static).unwrap();
        assert!(control.is_enabled(handle));
        codec.disable_handle(handle).unwrap();
        codec.free_handle(handle).unwrap();
        assert!(control.handles().is_empty());
    }

    #[test]
    fn test_query_transforms() {
        let (mut codec, control) = codec();
        codec.init().unwrap();
        let handle = codec.request_handle("*********1****").unwrap();
        codec.init_handle(handle).unwrap();
        codec.enable_handle(handle, TrackingPriority::Dynamic).unwrap();
        codec.start_tracking().unwrap();

        let reply = codec.query_transforms(ReplyOptions::default()).unwrap();
        assert_eq!(reply.records.len(), 1);
        assert!(reply.record(handle).unwrap().transform.is_none());

        control.set_pose(handle, [1.0, 0.0, 0.0, 0.0, 1.5, -2.25, 3.0, 0.1]);
        let reply = codec.query_transforms(ReplyOptions::default()).unwrap();
        let transform = reply.record(handle).unwrap().transform.unwrap();
        assert_eq!(transform[5], -2.25);
    }

    #[test]
    fn test_corrupt_reply() {
        let (mut codec, control) = codec();
        control.inject(Fault::Corrupt);
        let err = codec.init().unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(ProtocolError::BadCrc { .. })));
    }

    #[test]
    fn test_timeout_keeps_session_ready() {
        let (mut codec, control) = codec();
        control.inject(Fault::Stall);
        let err = codec.init().unwrap_err();
        assert!(err.is_timeout());
        codec.init().unwrap();
    }

    #[test]
    fn test_late_reply_is_discarded() {
        let (mut codec, control) = codec();
        control.set_parameter("P", "1");
        control.inject(Fault::Late);
        assert!(codec.init().unwrap_err().is_timeout());
        assert!(codec.needs_resync());

        // each command reads its own reply again
        assert_eq!(codec.get_parameter("P").unwrap(), "1");
        codec.init().unwrap();
        assert_eq!(codec.get_parameter("P").unwrap(), "1");
        assert!(!codec.needs_resync());
        assert_eq!(control.discards(), 1);
    }

    #[test]
    fn test_corrupt_reply_triggers_resync() {
        let (mut codec, control) = codec();
        control.inject(Fault::Corrupt);
        assert!(codec.init().is_err());
        assert!(codec.needs_resync());
        codec.init().unwrap();
        assert_eq!(control.discards(), 1);
    }

    #[test]
    fn test_device_error_keeps_line_in_step() {
        let (mut codec, control) = codec();
        control.fail_next(0x0C);
        assert!(codec.init().is_err());
        assert!(!codec.needs_resync());
        codec.init().unwrap();
        assert_eq!(control.discards(), 0);
    }

    #[test]
    fn test_get_parameter() {
        let (mut codec, control) = codec();
        control.set_parameter("Param.GPIO Device.Type", "2");
        assert_eq!(codec.get_parameter("Param.GPIO Device.Type").unwrap(), "2");
        let err = codec.get_parameter("Nope").unwrap_err();
        assert_eq!(err.device_code(), Some(0x23));
    }
}
