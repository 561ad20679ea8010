//! TCP transport
//!
//! Connects to a tracker (or a serial-to-network bridge) by host and
//! service. The service may be a port number or a well-known service name
//! understood by the system resolver.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::io::transport::{read_record, TransferParameters, Transport};

/// Stream transport over TCP
#[derive(Debug)]
pub struct SocketTransport {
    host: String,
    service: String,
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl SocketTransport {
    /// Create an unconnected transport for `host:service`
    ///
    /// # Examples
    ///
    /// ```
    /// use igt_tracker::io::socket::SocketTransport;
    /// use igt_tracker::io::transport::Transport;
    ///
    /// let transport = SocketTransport::new("localhost", "8765");
    /// assert_eq!(transport.describe(), "tcp://localhost:8765");
    /// ```
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            stream: None,
            pending: Vec::new(),
        }
    }

    /// Resolve the host/service pair to candidate addresses
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = match self.service.parse::<u16>() {
            Ok(port) => (self.host.as_str(), port).to_socket_addrs()?.collect(),
            Err(_) => format!("{}:{}", self.host, self.service)
                .to_socket_addrs()?
                .collect(),
        };
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}:{}", self.host, self.service),
            ));
        }
        Ok(addrs)
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not connected"))
    }
}

impl Transport for SocketTransport {
    fn open_port(&mut self, params: &TransferParameters) -> io::Result<()> {
        let mut last_error = None;
        for addr in self.resolve()? {
            debug!("Connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, params.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!("Connected to {}", addr);
                    self.stream = Some(stream);
                    self.pending.clear();
                    return Ok(());
                }
                Err(err) => {
                    debug!("Connection to {} failed: {}", addr, err);
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound)))
    }

    fn update_parameters(&mut self, params: &TransferParameters) -> io::Result<()> {
        // baud rate and handshake have no meaning on a socket
        let stream = self.stream()?;
        stream.set_read_timeout(Some(params.timeout))?;
        stream.set_write_timeout(Some(params.timeout))?;
        Ok(())
    }

    fn close_port(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                // peer already gone
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
                Err(err) => return Err(err),
            }
        }
        self.pending.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> io::Result<usize> {
        let stream = self.stream()?;
        stream.set_write_timeout(Some(timeout))?;
        stream.write_all(data)?;
        stream.flush()?;
        trace!(bytes = data.len(), "socket write");
        Ok(data.len())
    }

    fn read(
        &mut self,
        buf: &mut Vec<u8>,
        max: usize,
        terminator: Option<u8>,
        timeout: Duration,
    ) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not connected"))?;
        read_record(buf, max, terminator, timeout, &mut self.pending, |chunk, remaining| {
            stream.set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;
            stream.read(chunk)
        })
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;
        let drained = drain(stream);
        stream.set_nonblocking(false)?;
        let discarded = drained?;
        if discarded > 0 {
            debug!(bytes = discarded, "discarded unread input");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.service)
    }
}

/// Read everything already buffered on a non-blocking stream
fn drain(stream: &mut TcpStream) -> io::Result<usize> {
    let mut chunk = [0u8; 512];
    let mut total = 0;
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
