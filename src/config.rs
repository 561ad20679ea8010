//! Tracker configuration
//!
//! [`TrackerConfig`] is plain data (serde-serializable) so it can be
//! embedded in whatever configuration format the application uses.
//!
//! # Examples
//!
//! ```
//! use igt_tracker::config::{TrackerConfig, TransportConfig};
//!
//! let config = TrackerConfig {
//!     transport: TransportConfig::Socket {
//!         host: "192.168.1.20".to_string(),
//!         service: "8765".to_string(),
//!     },
//!     frequency_hz: 40.0,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.poll_interval().as_millis(), 25);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::io::transport::TransferParameters;
use crate::protocol::command::{BaudRate, Handshake, ReplyOptions, REPLY_TERMINATOR};
use crate::tracking::registry::validate_polling_frequency;

/// Default service for network-attached trackers
pub const DEFAULT_SERVICE: &str = "8765";

/// Which channel reaches the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Local serial port
    Serial {
        device: PathBuf,
        /// Rate negotiated with COMM after reset
        #[serde(default)]
        baud_rate: BaudRate,
        #[serde(default)]
        handshake: Handshake,
    },
    /// TCP connection by host name and service
    Socket { host: String, service: String },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Socket {
            host: "localhost".to_string(),
            service: DEFAULT_SERVICE.to_string(),
        }
    }
}

/// Tracker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub transport: TransportConfig,
    /// Per read/write deadline in milliseconds
    pub timeout_ms: u64,
    /// Polling frequency; 0 polls as fast as the device answers
    pub frequency_hz: f64,
    /// Record all traffic to this file
    pub capture_file: Option<PathBuf>,
    /// Report tools outside the characterized volume
    pub include_out_of_volume: bool,
    /// Pause between communication setup and INIT, in milliseconds
    pub settle_time_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timeout_ms: 1000,
            frequency_hz: 60.0,
            capture_file: None,
            include_out_of_volume: true,
            settle_time_ms: 1000,
        }
    }
}

impl TrackerConfig {
    /// Reject settings the tracker cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_polling_frequency(self.frequency_hz)?;
        // every read would expire before the device could answer
        if self.timeout_ms == 0 {
            return Err(TrackerError::InvalidConfig(
                "timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.transport, TransportConfig::Serial { .. })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_time_ms)
    }

    /// Time between polling cycles (zero when free-running)
    pub fn poll_interval(&self) -> Duration {
        interval_for(self.frequency_hz)
    }

    pub fn reply_options(&self) -> ReplyOptions {
        ReplyOptions {
            include_out_of_volume: self.include_out_of_volume,
        }
    }

    /// Line settings used to reach a freshly reset device
    pub fn initial_parameters(&self) -> TransferParameters {
        TransferParameters {
            baud_rate: BaudRate::B9600,
            handshake: Handshake::None,
            timeout: self.timeout(),
            read_terminator: Some(REPLY_TERMINATOR),
        }
    }

    /// Line settings after COMM negotiation
    pub fn operating_parameters(&self) -> TransferParameters {
        let mut params = self.initial_parameters();
        if let TransportConfig::Serial {
            baud_rate,
            handshake,
            ..
        } = &self.transport
        {
            params.baud_rate = *baud_rate;
            params.handshake = *handshake;
        }
        params
    }
}

/// Cycle interval for a validated frequency
pub(crate) fn interval_for(frequency_hz: f64) -> Duration {
    if frequency_hz > 0.0 {
        Duration::from_secs_f64(1.0 / frequency_hz)
    } else {
        Duration::ZERO
    }
}
