//! Serial line transport
//!
//! Built on `serialport`. The line runs 8N1 with optional RTS/CTS flow
//! control; every read and write sets the port timeout to what is left of
//! its own deadline.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, trace};

use crate::io::transport::{read_record, TransferParameters, Transport};
use crate::protocol::command::Handshake;

/// Serial line transport
pub struct SerialTransport {
    device: PathBuf,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Create a closed transport for the given device node
    pub fn new(device: impl AsRef<Path>) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
            port: None,
            pending: Vec::new(),
        }
    }

    /// Device node path
    pub fn device(&self) -> &Path {
        &self.device
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(not_open)
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port is not open")
}

fn flow_control(handshake: Handshake) -> FlowControl {
    match handshake {
        Handshake::RtsCts => FlowControl::Hardware,
        Handshake::None => FlowControl::None,
    }
}

impl Transport for SerialTransport {
    fn open_port(&mut self, params: &TransferParameters) -> io::Result<()> {
        let path = self.device.to_string_lossy().into_owned();
        let port = serialport::new(path, params.baud_rate.bits_per_second())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow_control(params.handshake))
            .timeout(params.timeout)
            .open()
            .map_err(io::Error::from)?;

        self.port = Some(port);
        self.pending.clear();
        info!("Opened serial port {}", self.device.display());
        Ok(())
    }

    fn update_parameters(&mut self, params: &TransferParameters) -> io::Result<()> {
        let port = self.port_mut()?;
        port.set_baud_rate(params.baud_rate.bits_per_second())?;
        port.set_flow_control(flow_control(params.handshake))?;
        port.set_timeout(params.timeout)?;
        port.clear(ClearBuffer::All)?;
        self.pending.clear();

        debug!(
            "Configured {} at {} baud ({:?})",
            self.device.display(),
            params.baud_rate.bits_per_second(),
            params.handshake
        );
        Ok(())
    }

    fn close_port(&mut self) -> io::Result<()> {
        self.pending.clear();
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.device.display());
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut written = 0;

        while written < data.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("wrote {} of {} bytes", written, data.len()),
                ));
            }
            port.set_timeout(remaining)?;
            match port.write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        port.flush()?;

        trace!(bytes = written, "serial write");
        Ok(written)
    }

    fn read(
        &mut self,
        buf: &mut Vec<u8>,
        max: usize,
        terminator: Option<u8>,
        timeout: Duration,
    ) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        read_record(buf, max, terminator, timeout, &mut self.pending, |chunk, remaining| {
            port.set_timeout(remaining)?;
            port.read(chunk)
        })
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port_mut()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.device.display())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("device", &self.device)
            .field("open", &self.port.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_mapping() {
        assert_eq!(flow_control(Handshake::None), FlowControl::None);
        assert_eq!(flow_control(Handshake::RtsCts), FlowControl::Hardware);
    }

    #[test]
    fn test_open_missing_device() {
        let mut transport = SerialTransport::new("/dev/does-not-exist-tracker");
        assert!(transport.open_port(&TransferParameters::default()).is_err());
        assert_eq!(transport.describe(), "serial:///dev/does-not-exist-tracker");
        assert!(transport.port.is_none());
    }

    #[test]
    fn test_io_on_closed_port() {
        let mut transport = SerialTransport::new("/dev/null");
        let mut buf = Vec::new();
        let err = transport
            .read(&mut buf, 16, Some(b'\r'), Duration::from_millis(1))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = transport.discard_input().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        transport.close_port().unwrap();
    }
}
