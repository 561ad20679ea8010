//! CRC-16 used by the tracking device protocol
//!
//! Every command sent and every reply received carries a CRC-16
//! (reflected polynomial 0xA001, initial value 0) rendered as four
//! uppercase hex digits in front of the terminating carriage return.

/// Lookup table for CRC-16 (poly 0xA001 reflected)
const CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Calculate the CRC-16 of a byte slice
///
/// # Examples
///
/// ```
/// use igt_tracker::protocol::crc::calculate_crc;
///
/// // Every successful command is answered with "OKAYA896"
/// assert_eq!(calculate_crc(b"OKAY"), 0xA896);
/// ```
pub fn calculate_crc(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u16) & 0xFF) as usize]
    })
}

/// Append the CRC of `data` as four uppercase hex digits
pub fn append_crc(data: &mut Vec<u8>) {
    let crc = calculate_crc(data);
    data.extend_from_slice(format!("{:04X}", crc).as_bytes());
}

/// Verify a payload against a received CRC value
///
/// Returns the computed CRC on mismatch so callers can report both values.
pub fn verify_crc(data: &[u8], received: u16) -> std::result::Result<(), u16> {
    let computed = calculate_crc(data);
    if computed == received {
        Ok(())
    } else {
        Err(computed)
    }
}
