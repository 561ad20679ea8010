//! Composite status + transform (TX) reply decoding
//!
//! One TX round trip reports every enabled port handle at once:
//!
//! ```text
//! nn                                  number of handle records (hex)
//! per record:
//!   hh                                port handle (hex)
//!   MISSING  ssssssss ffffffff        tool out of view, port status, frame
//!   DISABLED                          handle not enabled
//!   Q0 Qx Qy Qz  Tx Ty Tz  Err        8 fixed-width signed fields
//!      ssssssss ffffffff              port status, frame number
//!   LF
//! SSSS                                system status (hex)
//! ```
//!
//! Quaternion and error fields are `sign + 5 digits` with 4 implied
//! decimals; translation fields are `sign + 6 digits` with 2 implied decimals.

use bytes::Buf;

use crate::error::ProtocolError;
use crate::tracking::registry::PortHandle;

const QUATERNION_WIDTH: usize = 6;
const TRANSLATION_WIDTH: usize = 7;
const ERROR_WIDTH: usize = 6;
const ROTATION_SCALE: f64 = 10_000.0;
const TRANSLATION_SCALE: f64 = 100.0;

/// Port status bits reported for every handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct PortStatus(pub u32);

impl PortStatus {
    pub const TOOL_IN_PORT: u32 = 0x0001;
    pub const SWITCH_1_ON: u32 = 0x0002;
    pub const SWITCH_2_ON: u32 = 0x0004;
    pub const SWITCH_3_ON: u32 = 0x0008;
    pub const INITIALIZED: u32 = 0x0010;
    pub const ENABLED: u32 = 0x0020;
    pub const OUT_OF_VOLUME: u32 = 0x0040;
    pub const PARTIALLY_IN_VOLUME: u32 = 0x0080;

    /// Bits that must all be set for a tool to be tracked
    pub const AVAILABLE_MASK: u32 = Self::TOOL_IN_PORT | Self::INITIALIZED | Self::ENABLED;

    /// In port, initialized and enabled
    pub fn is_available(self) -> bool {
        self.0 & Self::AVAILABLE_MASK == Self::AVAILABLE_MASK
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }
}

/// Per-handle decode status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// A transform was reported
    Valid,
    /// Tool is enabled but not visible
    Missing,
    /// Handle is not enabled
    Disabled,
}

/// Raw 8-field transform in device order: `qw qx qy qz tx ty tz err`
pub type RawTransform = [f64; 8];

/// One handle record from a TX reply
#[derive(Debug, Clone, PartialEq)]
pub struct HandleRecord {
    pub handle: PortHandle,
    pub status: HandleStatus,
    /// Present only when `status` is [`HandleStatus::Valid`]
    pub transform: Option<RawTransform>,
    pub port_status: PortStatus,
    pub frame_number: u32,
}

impl HandleRecord {
    /// Record reporting a pose
    pub fn valid(handle: PortHandle, transform: RawTransform, port_status: u32, frame: u32) -> Self {
        Self {
            handle,
            status: HandleStatus::Valid,
            transform: Some(transform),
            port_status: PortStatus(port_status),
            frame_number: frame,
        }
    }

    /// Record for an enabled tool that is out of view
    pub fn missing(handle: PortHandle, port_status: u32, frame: u32) -> Self {
        Self {
            handle,
            status: HandleStatus::Missing,
            transform: None,
            port_status: PortStatus(port_status),
            frame_number: frame,
        }
    }

    /// Record for a handle that is not enabled
    pub fn disabled(handle: PortHandle) -> Self {
        Self {
            handle,
            status: HandleStatus::Disabled,
            transform: None,
            port_status: PortStatus::default(),
            frame_number: 0,
        }
    }
}

/// Decoded TX reply
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxReply {
    pub records: Vec<HandleRecord>,
    pub system_status: u16,
}

impl TxReply {
    /// Record for a handle, if the device reported it
    pub fn record(&self, handle: PortHandle) -> Option<&HandleRecord> {
        self.records.iter().find(|r| r.handle == handle)
    }

    /// Transform and decode status for a handle
    ///
    /// Handles the device did not mention are reported as disabled.
    pub fn transform(&self, handle: PortHandle) -> (HandleStatus, Option<RawTransform>) {
        match self.record(handle) {
            Some(record) => (record.status, record.transform),
            None => (HandleStatus::Disabled, None),
        }
    }

    /// Port status bits for a handle (zero when not reported)
    pub fn port_status(&self, handle: PortHandle) -> PortStatus {
        self.record(handle)
            .map(|r| r.port_status)
            .unwrap_or_default()
    }

    /// Parse the data portion of a TX reply (CRC already stripped)
    ///
    /// # Examples
    ///
    /// ```
    /// use igt_tracker::protocol::tx::{HandleStatus, TxReply};
    ///
    /// let text = "0101+10000+00000+00000+00000+001000+002000+003000+00100000000310000002A\n0000";
    /// let reply = TxReply::parse(text).unwrap();
    /// let (status, transform) = reply.transform(1);
    /// assert_eq!(status, HandleStatus::Valid);
    /// assert_eq!(transform.unwrap()[4], 10.0);
    /// ```
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut data = text.as_bytes();

        let count = hex_field(&mut data, 2, "handle count")? as usize;
        let mut records = Vec::with_capacity(count);

        for _ in 0..count {
            let handle = hex_field(&mut data, 2, "port handle")? as PortHandle;

            let record = if data.starts_with(b"MISSING") {
                data.advance(7);
                let port_status = hex_field(&mut data, 8, "port status")?;
                let frame = hex_field(&mut data, 8, "frame number")?;
                HandleRecord::missing(handle, port_status, frame)
            } else if data.starts_with(b"DISABLED") {
                data.advance(8);
                HandleRecord::disabled(handle)
            } else {
                let mut transform = [0.0; 8];
                for field in transform.iter_mut().take(4) {
                    *field = fixed_field(&mut data, QUATERNION_WIDTH, ROTATION_SCALE)?;
                }
                for field in transform.iter_mut().skip(4).take(3) {
                    *field = fixed_field(&mut data, TRANSLATION_WIDTH, TRANSLATION_SCALE)?;
                }
                transform[7] = fixed_field(&mut data, ERROR_WIDTH, ROTATION_SCALE)?;
                let port_status = hex_field(&mut data, 8, "port status")?;
                let frame = hex_field(&mut data, 8, "frame number")?;
                HandleRecord::valid(handle, transform, port_status, frame)
            };
            records.push(record);

            if data.first() == Some(&b'\n') {
                data.advance(1);
            }
        }

        let system_status = hex_field(&mut data, 4, "system status")? as u16;
        if !data.is_empty() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after TX reply",
                data.len()
            )));
        }

        Ok(TxReply {
            records,
            system_status,
        })
    }

    /// Render in device format (without CRC)
    pub fn encode(&self) -> String {
        let mut out = format!("{:02X}", self.records.len());
        for record in &self.records {
            out.push_str(&format!("{:02X}", record.handle));
            match (record.status, record.transform) {
                (HandleStatus::Valid, Some(t)) => {
                    for value in &t[..4] {
                        out.push_str(&format_fixed(*value, QUATERNION_WIDTH, ROTATION_SCALE));
                    }
                    for value in &t[4..7] {
                        out.push_str(&format_fixed(*value, TRANSLATION_WIDTH, TRANSLATION_SCALE));
                    }
                    out.push_str(&format_fixed(t[7], ERROR_WIDTH, ROTATION_SCALE));
                    out.push_str(&format!("{:08X}{:08X}", record.port_status.0, record.frame_number));
                }
                (HandleStatus::Disabled, _) => out.push_str("DISABLED"),
                _ => {
                    out.push_str("MISSING");
                    out.push_str(&format!("{:08X}{:08X}", record.port_status.0, record.frame_number));
                }
            }
            out.push('\n');
        }
        out.push_str(&format!("{:04X}", self.system_status));
        out
    }
}

fn take<'a>(data: &mut &'a [u8], width: usize, what: &str) -> Result<&'a [u8], ProtocolError> {
    if data.len() < width {
        return Err(ProtocolError::Malformed(format!(
            "TX reply truncated reading {}",
            what
        )));
    }
    let field = &data[..width];
    data.advance(width);
    Ok(field)
}

fn hex_field(data: &mut &[u8], width: usize, what: &str) -> Result<u32, ProtocolError> {
    let field = take(data, width, what)?;
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| u32::from_str_radix(text, 16).ok())
        .ok_or_else(|| ProtocolError::Malformed(format!("bad {} field", what)))
}

fn fixed_field(data: &mut &[u8], width: usize, scale: f64) -> Result<f64, ProtocolError> {
    let field = take(data, width, "transform")?;
    let (sign, digits) = match field.split_first() {
        Some((b'+', digits)) => (1.0, digits),
        Some((b'-', digits)) => (-1.0, digits),
        _ => {
            return Err(ProtocolError::Malformed(
                "transform field without sign".to_string(),
            ))
        }
    };
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::Malformed(
            "non-numeric transform field".to_string(),
        ));
    }
    let value = digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    Ok(sign * value as f64 / scale)
}

fn format_fixed(value: f64, width: usize, scale: f64) -> String {
    let digits = width - 1;
    let max = 10u64.pow(digits as u32) - 1;
    let scaled = ((value.abs() * scale).round() as u64).min(max);
    let sign = if value < 0.0 { '-' } else { '+' };
    format!("{}{:0width$}", sign, scaled, width = digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVAILABLE: u32 = 0x31;

    #[test]
    fn test_parse_valid_record() {
        let text = "0101+10000+00000+00000+00000+001000+002000+003000+00100000000310000002A\n0000";
        let reply = TxReply::parse(text).unwrap();
        assert_eq!(reply.records.len(), 1);

        let record = reply.record(1).unwrap();
        assert_eq!(record.status, HandleStatus::Valid);
        assert_eq!(record.port_status, PortStatus(AVAILABLE));
        assert_eq!(record.frame_number, 0x2A);

        let t = record.transform.unwrap();
        assert_eq!(&t[..4], &[1.0, 0.0, 0.0, 0.0]);
        assert!((t[4] - 10.0).abs() < 1e-9);
        assert!((t[5] - 20.0).abs() < 1e-9);
        assert!((t[6] - 30.0).abs() < 1e-9);
        assert!((t[7] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_parse_missing_and_disabled() {
        let text = "0202MISSING0000003100000007\n03DISABLED\n0000";
        let reply = TxReply::parse(text).unwrap();

        let (status, transform) = reply.transform(2);
        assert_eq!(status, HandleStatus::Missing);
        assert!(transform.is_none());
        assert!(reply.port_status(2).is_available());

        assert_eq!(reply.transform(3).0, HandleStatus::Disabled);
        assert_eq!(reply.port_status(3), PortStatus(0));
    }

    #[test]
    fn test_unknown_handle_is_disabled() {
        let reply = TxReply::parse("000000").unwrap();
        assert!(reply.records.is_empty());
        assert_eq!(reply.transform(9), (HandleStatus::Disabled, None));
    }

    #[test]
    fn test_negative_fields() {
        let record = HandleRecord::valid(4, [0.5, -0.5, 0.5, -0.5, -12.34, 0.0, 987.65, 0.1234], AVAILABLE, 1);
        let reply = TxReply {
            records: vec![record.clone()],
            system_status: 0,
        };
        let text = reply.encode();
        assert!(text.contains("-05000"), "{}", text);
        assert!(text.contains("-001234"), "{}", text);
        assert_eq!(TxReply::parse(&text).unwrap().records[0], record);
    }

    #[test]
    fn test_truncated_reply() {
        let err = TxReply::parse("0101+10000+00000").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_missing_sign() {
        let text = "0101 10000+00000+00000+00000+001000+002000+003000+00100000000310000002A\n0000";
        assert!(matches!(TxReply::parse(text), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(matches!(TxReply::parse("000000XX"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_port_status_mask() {
        assert!(PortStatus(0x31).is_available());
        assert!(PortStatus(0x33).is_available());
        assert!(!PortStatus(0x11).is_available());
        assert!(!PortStatus(0x30).is_available());
        assert!(PortStatus(0x71).contains(PortStatus::OUT_OF_VOLUME));
    }
}
