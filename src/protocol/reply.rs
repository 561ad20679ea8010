//! Reply framing and the device error register
//!
//! Every reply is a single record terminated by a carriage return. The last
//! four characters before the terminator are the CRC-16 of the rest of the
//! record. `ERRORnn` replies carry a two-digit hex error code which the codec
//! loads into its error register.

use crate::error::ProtocolError;
use crate::protocol::command::REPLY_TERMINATOR;
use crate::protocol::crc::verify_crc;

/// Decoded reply record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command completed without data
    Okay,
    /// Answer to a reset
    Reset,
    /// Command completed with a non-fatal warning code
    Warning(u8),
    /// Command failed with a device error code
    Error(u8),
    /// Command completed and returned data
    Data(String),
}

impl Reply {
    /// Value to load into the device error register for this reply
    pub fn error_code(&self) -> u8 {
        match self {
            Reply::Error(code) => *code,
            _ => 0,
        }
    }
}

/// Parse a received record (with or without the trailing terminator)
///
/// # Errors
///
/// - [`ProtocolError::Malformed`] - record too short, non-ASCII, or unreadable CRC
/// - [`ProtocolError::BadCrc`] - CRC does not match the payload
///
/// # Examples
///
/// ```
/// use igt_tracker::protocol::reply::{parse_reply, Reply};
///
/// assert_eq!(parse_reply(b"OKAYA896\r").unwrap(), Reply::Okay);
/// ```
pub fn parse_reply(record: &[u8]) -> Result<Reply, ProtocolError> {
    let record = record.strip_suffix(&[REPLY_TERMINATOR]).unwrap_or(record);
    if record.len() < 4 {
        return Err(ProtocolError::Malformed(format!(
            "reply of {} bytes is shorter than its CRC",
            record.len()
        )));
    }

    let (payload, crc_text) = record.split_at(record.len() - 4);
    let received = std::str::from_utf8(crc_text)
        .ok()
        .and_then(|text| u16::from_str_radix(text, 16).ok())
        .ok_or_else(|| ProtocolError::Malformed("unreadable reply CRC".to_string()))?;

    verify_crc(payload, received).map_err(|expected| ProtocolError::BadCrc {
        expected,
        actual: received,
    })?;

    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::Malformed("reply is not ASCII".to_string()))?;

    if text == "OKAY" {
        return Ok(Reply::Okay);
    }
    if text == "RESET" {
        return Ok(Reply::Reset);
    }
    if let Some(code) = text.strip_prefix("ERROR") {
        return parse_code(code).map(Reply::Error);
    }
    if let Some(code) = text.strip_prefix("WARNING") {
        return parse_code(code).map(Reply::Warning);
    }
    Ok(Reply::Data(text.to_string()))
}

fn parse_code(text: &str) -> Result<u8, ProtocolError> {
    if text.len() != 2 {
        return Err(ProtocolError::Malformed(format!("bad status code '{}'", text)));
    }
    u8::from_str_radix(text, 16)
        .map_err(|_| ProtocolError::Malformed(format!("bad status code '{}'", text)))
}

/// Human-readable text for a device error code
pub fn error_string(code: u8) -> &'static str {
    match code {
        0x00 => "No error",
        0x01 => "Invalid command",
        0x02 => "Command too long",
        0x03 => "Command too short",
        0x04 => "Invalid CRC calculated for command",
        0x05 => "Time-out on command execution",
        0x06 => "Unable to set up new communication parameters",
        0x07 => "Incorrect number of command parameters",
        0x08 => "Invalid port handle selected",
        0x09 => "Invalid tracking priority selected",
        0x0A => "Invalid LED selected",
        0x0B => "Invalid LED state selected",
        0x0C => "Command is invalid while in the current operating mode",
        0x0D => "No tool is assigned to the selected port handle",
        0x0E => "Selected port handle not initialized",
        0x0F => "Selected port handle not enabled",
        0x10 => "System not initialized",
        0x11 => "Unable to stop tracking",
        0x12 => "Unable to start tracking",
        0x13 => "Unable to initialize tool-in-port",
        0x14 => "Invalid position sensor characterization parameters",
        0x15 => "Unable to initialize the system",
        0x16 => "Unable to start diagnostic mode",
        0x17 => "Unable to stop diagnostic mode",
        0x19 => "Unable to read device firmware version information",
        0x1A => "Internal system error",
        0x1D => "Unable to search for SROM IDs",
        0x1E => "Unable to read SROM data",
        0x1F => "Unable to write SROM data",
        0x20 => "Unable to select SROM",
        0x23 => "Command parameter out of range",
        0x24 => "Unable to select volume",
        0x25 => "Unable to determine supported features",
        0x2A => "Too many tools are enabled",
        0x2D => "No memory available for dynamic allocation",
        0x2E => "Requested port handle has not been allocated",
        0x2F => "Requested port handle has become unoccupied",
        0x30 => "All handles have been allocated",
        0x31 => "Incompatible firmware versions",
        0x32 => "Invalid port description",
        0x33 => "Requested port is already assigned a port handle",
        0xF4 => "Unable to erase flash SROM device",
        0xF5 => "Unable to write flash SROM device",
        0xF6 => "Unable to read flash SROM device",
        _ => "Unrecognized error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::append_crc;

    fn frame(payload: &str) -> Vec<u8> {
        let mut buf = payload.as_bytes().to_vec();
        append_crc(&mut buf);
        buf.push(REPLY_TERMINATOR);
        buf
    }

    #[test]
    fn test_okay_and_reset() {
        assert_eq!(parse_reply(b"OKAYA896\r").unwrap(), Reply::Okay);
        assert_eq!(parse_reply(b"RESETBE6F").unwrap(), Reply::Reset);
    }

    #[test]
    fn test_error_reply() {
        let reply = parse_reply(b"ERROR016BC2\r").unwrap();
        assert_eq!(reply, Reply::Error(0x01));
        assert_eq!(reply.error_code(), 0x01);
        assert_eq!(parse_reply(&frame("ERROR0C")).unwrap(), Reply::Error(0x0C));
    }

    #[test]
    fn test_warning_reply() {
        let reply = parse_reply(&frame("WARNING02")).unwrap();
        assert_eq!(reply, Reply::Warning(0x02));
        assert_eq!(reply.error_code(), 0);
    }

    #[test]
    fn test_data_reply() {
        let reply = parse_reply(&frame("0A")).unwrap();
        assert_eq!(reply, Reply::Data("0A".to_string()));
    }

    #[test]
    fn test_bad_crc() {
        let err = parse_reply(b"OKAY0000\r").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BadCrc {
                expected: 0xA896,
                actual: 0x0000
            }
        );
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse_reply(b"OK\r"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_reply(b"OKAYZZZZ\r"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            parse_reply(&frame("ERROR1")),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_error_strings() {
        assert_eq!(error_string(0x0C), "Command is invalid while in the current operating mode");
        assert_eq!(error_string(0xEE), "Unrecognized error code");
    }
}
