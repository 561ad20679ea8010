//! Communication capture log
//!
//! Records every command sent and every reply received by a transport
//! session, one numbered line per entry:
//!
//! ```text
//! # recorded 1718000000
//! 1. command[10] INIT:E3A5\x0d
//! 2. receive[9] OKAYA896\x0d
//! ```
//!
//! Printable ASCII is written as-is, backslashes are doubled and every other
//! byte becomes `\xhh`, so the file is line-oriented and lossless.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Direction of a captured transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes written to the device
    Command,
    /// Bytes read from the device
    Receive,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Command => "command",
            Direction::Receive => "receive",
        }
    }
}

/// Append-only capture log with a running sequence number
pub struct CaptureLog {
    writer: Box<dyn Write + Send>,
    sequence: u64,
}

impl CaptureLog {
    /// Create (or truncate) a capture file and write its header
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        let mut log = Self::from_writer(BufWriter::new(file));
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        writeln!(log.writer, "# recorded {}", stamp)?;
        log.writer.flush()?;
        Ok(log)
    }

    /// Capture into an arbitrary writer (no header)
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
            sequence: 0,
        }
    }

    /// Number of entries recorded so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Append one entry and return its sequence number
    pub fn record(&mut self, direction: Direction, bytes: &[u8]) -> io::Result<u64> {
        self.sequence += 1;
        writeln!(
            self.writer,
            "{}. {}[{}] {}",
            self.sequence,
            direction.label(),
            bytes.len(),
            encode_bytes(bytes)
        )?;
        self.writer.flush()?;
        Ok(self.sequence)
    }
}

impl std::fmt::Debug for CaptureLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLog")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Escape bytes for a capture line
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}

/// Reverse of [`encode_bytes`]; `None` on a malformed escape
pub fn decode_bytes(text: &str) -> Option<Vec<u8>> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match raw.get(i + 1) {
            Some(b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(b'x') => {
                let hex = text.get(i + 2..i + 4)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 4;
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_escaping() {
        assert_eq!(encode_bytes(b"OKAYA896\r"), "OKAYA896\\x0d");
        assert_eq!(encode_bytes(b"a\\b\n"), "a\\\\b\\x0a");
        assert_eq!(decode_bytes("a\\\\b\\x0a").unwrap(), b"a\\b\n");
        assert_eq!(decode_bytes("bad\\q"), None);
        assert_eq!(decode_bytes("short\\x0"), None);
    }

    #[test]
    fn test_sequence_numbers() {
        let buf = SharedBuf::default();
        let mut log = CaptureLog::from_writer(buf.clone());
        assert_eq!(log.record(Direction::Command, b"INIT:E3A5\r").unwrap(), 1);
        assert_eq!(log.record(Direction::Receive, b"").unwrap(), 2);
        assert_eq!(log.sequence(), 2);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["1. command[10] INIT:E3A5\\x0d", "2. receive[0] "]);
    }
}
