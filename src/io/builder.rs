//! Type-state builder for trackers
//!
//! The builder makes the link choice explicit before anything can be built.
//! Serial-only settings are only available once a serial link is selected.
//!
//! ```text
//! TrackerBuilder<Unspecified>
//!   ├─ .serial(device)       → TrackerBuilder<SerialConfigured>
//!   │   ├─ .baud_rate(rate)  → self
//!   │   ├─ .handshake(hs)    → self
//!   │   └─ .build()          → Result<Tracker>
//!   ├─ .tcp(host, service)   → TrackerBuilder<SocketConfigured>
//!   │   └─ .build()          → Result<Tracker>
//!   └─ .transport(boxed)     → TrackerBuilder<CustomConfigured>
//!       ├─ .serial_line(..)  → self
//!       └─ .build()          → Result<Tracker>
//! ```
//!
//! Shared settings (timeout, frequency, capture file, ...) can be set in any
//! state.
//!
//! # Examples
//!
//! ```
//! use igt_tracker::io::builder::TrackerBuilder;
//! use igt_tracker::io::simulator::SimulatedDevice;
//! use std::time::Duration;
//!
//! let (device, _control) = SimulatedDevice::new();
//! let tracker = TrackerBuilder::new()
//!     .transport(Box::new(device))
//!     .frequency(30.0)
//!     .timeout(Duration::from_millis(200))
//!     .build()?;
//! assert!(!tracker.is_open());
//! # Ok::<(), igt_tracker::error::TrackerError>(())
//! ```
//!
//! Serial settings on a TCP link do not compile:
//!
//! ```compile_fail
//! use igt_tracker::io::builder::TrackerBuilder;
//! use igt_tracker::protocol::command::BaudRate;
//!
//! let tracker = TrackerBuilder::new()
//!     .tcp("localhost", "8765")
//!     .baud_rate(BaudRate::B115200)
//!     .build();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{TrackerConfig, TransportConfig};
use crate::error::Result;
use crate::io::serial::SerialTransport;
use crate::io::socket::SocketTransport;
use crate::io::transport::Transport;
use crate::protocol::command::{BaudRate, Handshake};
use crate::tracking::tracker::Tracker;

/// No link selected yet
pub struct Unspecified;

/// Local serial port selected
pub struct SerialConfigured {
    device: PathBuf,
    baud_rate: BaudRate,
    handshake: Handshake,
}

/// TCP link selected
pub struct SocketConfigured {
    host: String,
    service: String,
}

/// Caller-supplied transport
pub struct CustomConfigured {
    transport: Box<dyn Transport>,
}

/// Type-state builder for [`Tracker`]
pub struct TrackerBuilder<Link = Unspecified> {
    link: Link,
    config: TrackerConfig,
}

impl TrackerBuilder<Unspecified> {
    pub fn new() -> Self {
        Self {
            link: Unspecified,
            config: TrackerConfig::default(),
        }
    }

    /// Use a local serial port
    pub fn serial(self, device: impl AsRef<Path>) -> TrackerBuilder<SerialConfigured> {
        TrackerBuilder {
            link: SerialConfigured {
                device: device.as_ref().to_path_buf(),
                baud_rate: BaudRate::default(),
                handshake: Handshake::default(),
            },
            config: self.config,
        }
    }

    /// Use a TCP connection; `service` is a port number or service name
    pub fn tcp(self, host: impl Into<String>, service: impl Into<String>) -> TrackerBuilder<SocketConfigured> {
        TrackerBuilder {
            link: SocketConfigured {
                host: host.into(),
                service: service.into(),
            },
            config: self.config,
        }
    }

    /// Use an already constructed transport
    pub fn transport(self, transport: Box<dyn Transport>) -> TrackerBuilder<CustomConfigured> {
        TrackerBuilder {
            link: CustomConfigured { transport },
            config: self.config,
        }
    }
}

impl Default for TrackerBuilder<Unspecified> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Link> TrackerBuilder<Link> {
    /// Per read/write deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Polling frequency in Hz, validated on build
    pub fn frequency(mut self, hz: f64) -> Self {
        self.config.frequency_hz = hz;
        self
    }

    /// Record all traffic to a file
    pub fn capture(mut self, path: impl AsRef<Path>) -> Self {
        self.config.capture_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn include_out_of_volume(mut self, include: bool) -> Self {
        self.config.include_out_of_volume = include;
        self
    }

    /// Pause before INIT during open
    pub fn settle_time(mut self, settle: Duration) -> Self {
        self.config.settle_time_ms = u64::try_from(settle.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl TrackerBuilder<SerialConfigured> {
    /// Rate negotiated with the device after reset
    pub fn baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.link.baud_rate = baud_rate;
        self
    }

    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.link.handshake = handshake;
        self
    }

    pub fn build(self) -> Result<Tracker> {
        let mut config = self.config;
        config.transport = TransportConfig::Serial {
            device: self.link.device,
            baud_rate: self.link.baud_rate,
            handshake: self.link.handshake,
        };
        Tracker::from_config(config)
    }
}

impl TrackerBuilder<SocketConfigured> {
    pub fn build(self) -> Result<Tracker> {
        let mut config = self.config;
        config.transport = TransportConfig::Socket {
            host: self.link.host,
            service: self.link.service,
        };
        Tracker::from_config(config)
    }
}

impl TrackerBuilder<CustomConfigured> {
    /// Treat the transport as a serial line and negotiate this rate
    pub fn serial_line(mut self, baud_rate: BaudRate, handshake: Handshake) -> Self {
        self.config.transport = TransportConfig::Serial {
            device: PathBuf::from(self.link.transport.describe()),
            baud_rate,
            handshake,
        };
        self
    }

    pub fn build(self) -> Result<Tracker> {
        Tracker::new(self.link.transport, self.config)
    }
}

/// Construct the transport a configuration names
pub fn transport_from_config(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    match config {
        TransportConfig::Socket { host, service } => {
            Ok(Box::new(SocketTransport::new(host.clone(), service.clone())))
        }
        TransportConfig::Serial { device, .. } => {
            Ok(Box::new(SerialTransport::new(device)))
        }
    }
}
