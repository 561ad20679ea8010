//! Platform transport interface
//!
//! A [`Transport`] performs the raw channel operations for a
//! [`TransportSession`](crate::io::session::TransportSession). Implementations
//! report plain `std::io::Result`s; the session maps them onto its
//! Success / Failure / Timeout inputs.

use std::io;
use std::time::{Duration, Instant};

use crate::protocol::command::{BaudRate, Handshake, REPLY_TERMINATOR};

/// Default per-operation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Channel configuration applied on open and by `update_parameters`
#[derive(Debug, Clone, PartialEq)]
pub struct TransferParameters {
    /// Serial line speed (ignored by socket transports)
    pub baud_rate: BaudRate,
    /// Serial flow control (ignored by socket transports)
    pub handshake: Handshake,
    /// Deadline for each individual read or write
    pub timeout: Duration,
    /// Stop reading once this byte has been received
    pub read_terminator: Option<u8>,
}

impl Default for TransferParameters {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::B9600,
            handshake: Handshake::None,
            timeout: DEFAULT_TIMEOUT,
            read_terminator: Some(REPLY_TERMINATOR),
        }
    }
}

/// Raw channel operations
///
/// Timeouts must be reported as [`io::ErrorKind::TimedOut`] (or
/// `WouldBlock`); every other error is treated as a failure.
pub trait Transport: Send {
    /// Open the channel and apply initial parameters
    fn open_port(&mut self, params: &TransferParameters) -> io::Result<()>;

    /// Re-apply parameters on the open channel
    fn update_parameters(&mut self, params: &TransferParameters) -> io::Result<()>;

    /// Close the channel
    fn close_port(&mut self) -> io::Result<()>;

    /// Write all of `data`, returning the number of bytes written
    fn write(&mut self, data: &[u8], timeout: Duration) -> io::Result<usize>;

    /// Append up to `max` bytes to `buf`, stopping after `terminator`
    ///
    /// On timeout, bytes received so far stay in `buf`.
    fn read(
        &mut self,
        buf: &mut Vec<u8>,
        max: usize,
        terminator: Option<u8>,
        timeout: Duration,
    ) -> io::Result<()>;

    /// Drop every byte received but not yet read
    ///
    /// Used to resynchronise after a reply that arrived too late or could
    /// not be parsed. Must not block waiting for more input.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Pause the caller
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Human-readable endpoint description for logs
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open_port(&mut self, params: &TransferParameters) -> io::Result<()> {
        (**self).open_port(params)
    }

    fn update_parameters(&mut self, params: &TransferParameters) -> io::Result<()> {
        (**self).update_parameters(params)
    }

    fn close_port(&mut self) -> io::Result<()> {
        (**self).close_port()
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> io::Result<usize> {
        (**self).write(data, timeout)
    }

    fn read(
        &mut self,
        buf: &mut Vec<u8>,
        max: usize,
        terminator: Option<u8>,
        timeout: Duration,
    ) -> io::Result<()> {
        (**self).read(buf, max, terminator, timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Shared record-reading loop for byte-stream transports
///
/// Moves bytes from `pending` (left over from a previous read) and then from
/// `read_chunk` into `buf` until the terminator is seen, `max` bytes were
/// collected, or the deadline passes. Bytes after the terminator are kept in
/// `pending` for the next call.
pub(crate) fn read_record<F>(
    buf: &mut Vec<u8>,
    max: usize,
    terminator: Option<u8>,
    timeout: Duration,
    pending: &mut Vec<u8>,
    mut read_chunk: F,
) -> io::Result<()>
where
    F: FnMut(&mut [u8], Duration) -> io::Result<usize>,
{
    let deadline = Instant::now() + timeout;
    let start = buf.len();
    let mut chunk = [0u8; 512];

    loop {
        if take_pending(buf, start, max, terminator, pending) {
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline expired"));
        }

        let n = read_chunk(&mut chunk, remaining)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "channel closed by peer",
            ));
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}

/// Move pending bytes into `buf`; true once the record is complete
fn take_pending(
    buf: &mut Vec<u8>,
    start: usize,
    max: usize,
    terminator: Option<u8>,
    pending: &mut Vec<u8>,
) -> bool {
    let room = max.saturating_sub(buf.len() - start);
    let limit = room.min(pending.len());
    let (take, done) = match terminator.and_then(|t| pending[..limit].iter().position(|&b| b == t)) {
        Some(pos) => (pos + 1, true),
        None => (limit, limit == room),
    };
    buf.extend(pending.drain(..take));
    done
}
