//! Device commands and their wire encoding
//!
//! Commands are ASCII lines of the form `NAME:ARGS`, followed by the CRC-16
//! of that text as four hex digits and a carriage return.

use bytes::{BufMut, BytesMut};

use crate::protocol::crc::calculate_crc;
use crate::tracking::registry::PortHandle;

/// Reply terminator used by the device for every record
pub const REPLY_TERMINATOR: u8 = b'\r';

/// Default PHRQ selector: any hardware, wireless tool, any port
pub const DEFAULT_HANDLE_SELECTOR: &str = "*********1****";

/// Serial baud rates understood by the COMM command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum BaudRate {
    B9600,
    B14400,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
    B921600,
    B1228739,
}

impl BaudRate {
    /// Baud rate in bits per second
    pub fn bits_per_second(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B14400 => 14400,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
            BaudRate::B921600 => 921600,
            BaudRate::B1228739 => 1228739,
        }
    }

    /// Digit used by the COMM command
    fn comm_digit(self) -> char {
        match self {
            BaudRate::B9600 => '0',
            BaudRate::B14400 => '1',
            BaudRate::B19200 => '2',
            BaudRate::B38400 => '3',
            BaudRate::B57600 => '4',
            BaudRate::B115200 => '5',
            BaudRate::B921600 => '6',
            BaudRate::B1228739 => '7',
        }
    }
}

/// Hardware flow control on the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Handshake {
    #[default]
    None,
    RtsCts,
}

/// Tracking priority used when enabling a port handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TrackingPriority {
    /// Tool is expected to move
    #[default]
    Dynamic,
    /// Tool is expected to stay still (reference frames)
    Static,
    /// Button box / switches only, no pose
    ButtonBox,
}

impl TrackingPriority {
    fn code(self) -> char {
        match self {
            TrackingPriority::Dynamic => 'D',
            TrackingPriority::Static => 'S',
            TrackingPriority::ButtonBox => 'B',
        }
    }
}

/// Which firmware component VER reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionTarget {
    ControlFirmware = 0,
    SensorFirmware = 1,
    ControlFirmwareEnhanced = 4,
}

/// Options for the composite status+transform (TX) query
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReplyOptions {
    /// Report poses of tools outside the characterized volume instead of MISSING
    pub include_out_of_volume: bool,
}

impl ReplyOptions {
    /// Transforms and port status for all handles
    pub const TRANSFORMS_AND_STATUS: u16 = 0x0001;
    /// Include tools outside the characterized measurement volume
    pub const INCLUDE_OUT_OF_VOLUME: u16 = 0x0800;

    /// Bit mask sent with the TX command
    pub fn bits(self) -> u16 {
        let mut bits = Self::TRANSFORMS_AND_STATUS;
        if self.include_out_of_volume {
            bits |= Self::INCLUDE_OUT_OF_VOLUME;
        }
        bits
    }
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            include_out_of_volume: true,
        }
    }
}

/// A device command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Soft reset; the device answers `RESET`
    Reset,
    /// Initialize the system after reset
    Init,
    /// Change serial communication parameters
    Comm {
        baud_rate: BaudRate,
        handshake: Handshake,
    },
    /// Firmware/version information
    Ver(VersionTarget),
    /// Enter tracking mode
    TStart,
    /// Leave tracking mode
    TStop,
    /// Request a new port handle matching a hardware selector
    Phrq { selector: String },
    /// Initialize a port handle
    Pinit(PortHandle),
    /// Enable a port handle for tracking
    Pena {
        handle: PortHandle,
        priority: TrackingPriority,
    },
    /// Disable a port handle
    Pdis(PortHandle),
    /// Free a port handle
    Phf(PortHandle),
    /// Composite status + transform query for every enabled handle
    Tx(ReplyOptions),
    /// Read a user parameter (e.g. GPIO configuration)
    Get { parameter: String },
}

impl Command {
    /// Command name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset => "RESET",
            Command::Init => "INIT",
            Command::Comm { .. } => "COMM",
            Command::Ver(_) => "VER",
            Command::TStart => "TSTART",
            Command::TStop => "TSTOP",
            Command::Phrq { .. } => "PHRQ",
            Command::Pinit(_) => "PINIT",
            Command::Pena { .. } => "PENA",
            Command::Pdis(_) => "PDIS",
            Command::Phf(_) => "PHF",
            Command::Tx(_) => "TX",
            Command::Get { .. } => "GET",
        }
    }

    fn arguments(&self) -> String {
        match self {
            Command::Reset | Command::Init | Command::TStart | Command::TStop => String::new(),
            Command::Comm {
                baud_rate,
                handshake,
            } => {
                // baud, 8 data bits, no parity, 1 stop bit, handshake
                let hs = match handshake {
                    Handshake::None => '0',
                    Handshake::RtsCts => '1',
                };
                format!("{}000{}", baud_rate.comm_digit(), hs)
            }
            Command::Ver(target) => format!("{}", *target as u8),
            Command::Phrq { selector } => selector.clone(),
            Command::Pinit(handle) | Command::Pdis(handle) | Command::Phf(handle) => {
                format!("{:02X}", handle)
            }
            Command::Pena { handle, priority } => format!("{:02X}{}", handle, priority.code()),
            Command::Tx(options) => format!("{:04X}", options.bits()),
            Command::Get { parameter } => parameter.clone(),
        }
    }

    /// Encode into a complete wire frame: `NAME:ARGS` + CRC + CR
    ///
    /// # Examples
    ///
    /// ```
    /// use igt_tracker::protocol::command::Command;
    ///
    /// assert_eq!(Command::Init.encode(), b"INIT:E3A5\r");
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let name = self.name();
        let args = self.arguments();
        let mut buf = BytesMut::with_capacity(name.len() + args.len() + 6);
        buf.put_slice(name.as_bytes());
        buf.put_u8(b':');
        buf.put_slice(args.as_bytes());
        let crc = calculate_crc(&buf);
        buf.put_slice(format!("{:04X}", crc).as_bytes());
        buf.put_u8(REPLY_TERMINATOR);
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::Init.encode(), b"INIT:E3A5\r");
        assert_eq!(Command::TStart.encode(), b"TSTART:5423\r");
    }

    #[test]
    fn test_comm_encoding() {
        let cmd = Command::Comm {
            baud_rate: BaudRate::B115200,
            handshake: Handshake::None,
        };
        assert_eq!(cmd.encode(), b"COMM:500000048\r");

        let cmd = Command::Comm {
            baud_rate: BaudRate::B9600,
            handshake: Handshake::RtsCts,
        };
        assert!(cmd.encode().starts_with(b"COMM:00001"));
    }

    #[test]
    fn test_handle_commands() {
        let cmd = Command::Pena {
            handle: 1,
            priority: TrackingPriority::Dynamic,
        };
        assert_eq!(cmd.encode(), b"PENA:01D6D3B\r");
        assert!(Command::Phf(0x0A).encode().starts_with(b"PHF:0A"));
        assert!(Command::Pdis(0x0B).encode().starts_with(b"PDIS:0B"));
        assert!(Command::Pinit(2).encode().starts_with(b"PINIT:02"));
    }

    #[test]
    fn test_tx_options() {
        assert_eq!(ReplyOptions::default().bits(), 0x0801);
        assert_eq!(Command::Tx(ReplyOptions::default()).encode(), b"TX:0801C19B\r");

        let narrow = ReplyOptions {
            include_out_of_volume: false,
        };
        assert!(Command::Tx(narrow).encode().starts_with(b"TX:0001"));
    }

    #[test]
    fn test_phrq_and_ver() {
        let cmd = Command::Phrq {
            selector: DEFAULT_HANDLE_SELECTOR.to_string(),
        };
        assert_eq!(cmd.encode(), b"PHRQ:*********1****A4C1\r");
        assert_eq!(
            Command::Ver(VersionTarget::ControlFirmwareEnhanced).encode(),
            b"VER:4A6EF\r"
        );
    }

    #[test]
    fn test_baud_rates() {
        assert_eq!(BaudRate::default().bits_per_second(), 115200);
        assert_eq!(BaudRate::B1228739.bits_per_second(), 1228739);
    }
}
