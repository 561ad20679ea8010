//! Error types for tracking-device operations
//!
//! This module defines all error types that can occur while talking to a
//! tracking device: channel-level transport failures, device protocol errors,
//! degenerate decoded data, and tool-registry misuse.

use thiserror::Error;

/// Top-level error type
///
/// All fallible operations in this library return `Result<T, TrackerError>`.
/// Every variant is recoverable: the session stays usable after any of them.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Channel-level failure (open/close/read/write/timeout)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device reported an error or sent an unreadable reply
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A decoded value was numerically unusable
    ///
    /// The polling engine recovers from these locally; they only surface
    /// when decoding is invoked directly.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Tool registry misuse (duplicate attach, unknown detach, ...)
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A configuration value the tracker cannot run with
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session transition table failed validation
    #[error("State machine error: {0}")]
    StateMachine(#[from] crate::io::state_machine::TableError),

    /// I/O error outside of an open session (e.g. creating a capture file)
    ///
    /// # Example
    /// ```no_run
    /// # use igt_tracker::error::TrackerError;
    /// # use std::io;
    /// let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "read-only filesystem");
    /// let err = TrackerError::Io(io_err);
    /// ```
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport session failures
///
/// A `Timeout` means the channel is healthy but the device did not answer in
/// time. Neither variant closes the session.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The platform operation failed
    #[error("{operation} failed: {source}")]
    Failure {
        /// Operation name ("open", "write", ...)
        operation: &'static str,
        /// Underlying platform error
        #[source]
        source: std::io::Error,
    },

    /// The operation did not complete before its deadline
    ///
    /// # Example
    /// ```no_run
    /// # use igt_tracker::error::TransportError;
    /// let err = TransportError::Timeout { operation: "read", transferred: 12 };
    /// ```
    #[error("{operation} timed out after {transferred} bytes")]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Bytes moved before the deadline expired
        transferred: usize,
    },

    /// Read/write/update attempted on a session that was never opened
    #[error("{operation} requires an open session")]
    NotOpen {
        /// Operation name
        operation: &'static str,
    },

    /// The requested operation is not accepted in the current session state
    ///
    /// Issued for misuse such as opening an already open session or
    /// writing to a closed one. The session state is left untouched.
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        /// Operation name
        operation: &'static str,
        /// Session state at the time of the call
        state: crate::io::state_machine::State,
    },
}

/// Device protocol failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Nonzero device error register after a command
    ///
    /// # Example
    /// ```no_run
    /// # use igt_tracker::error::ProtocolError;
    /// let err = ProtocolError::Device { code: 0x0C };
    /// assert!(err.to_string().contains("0x0C"));
    /// ```
    #[error("device error {code:#04X}: {}", crate::protocol::reply::error_string(*code))]
    Device {
        /// Raw device error code
        code: u8,
    },

    /// Reply CRC did not match its payload
    #[error("reply CRC mismatch: expected {expected:04X}, got {actual:04X}")]
    BadCrc {
        /// CRC computed over the received payload
        expected: u16,
        /// CRC carried by the reply
        actual: u16,
    },

    /// Reply could not be parsed
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Decoded-data problems
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// Quaternion with (near-)zero norm, replaced by the identity rotation
    #[error("degenerate quaternion, norm={norm}")]
    DegenerateQuaternion {
        /// Euclidean norm of the received quaternion
        norm: f64,
    },
}

/// Tool registry misuse
///
/// These are returned synchronously and never touch the device or the
/// registry contents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A tool with this identifier is already attached
    #[error("tool '{0}' is already attached")]
    DuplicateTool(String),

    /// No tool with this identifier is attached
    #[error("tool '{0}' is not attached")]
    UnknownTool(String),

    /// The transport session is not open
    #[error("tracker is not open")]
    NotOpen,

    /// The port handle is already bound to another tool
    #[error("port handle {handle:02X} is already bound to '{tool}'")]
    HandleInUse {
        /// Requested handle
        handle: u16,
        /// Tool currently holding it
        tool: String,
    },

    /// Polling frequency must be a non-negative number
    #[error("invalid polling frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// The operation requires tracking to be stopped first
    #[error("operation not allowed while tracking is active")]
    TrackingActive,
}

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    /// True for transport timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, TrackerError::Transport(TransportError::Timeout { .. }))
    }

    /// Device error code, if this is a device-reported protocol error
    pub fn device_code(&self) -> Option<u8> {
        match self {
            TrackerError::Protocol(ProtocolError::Device { code }) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = TrackerError::from(ProtocolError::Device { code: 0x01 });
        let text = err.to_string();
        assert!(text.contains("0x01"), "{}", text);
        assert!(text.contains("Invalid command"), "{}", text);
        assert_eq!(err.device_code(), Some(0x01));
    }

    #[test]
    fn test_timeout_is_distinct() {
        let timeout = TrackerError::from(TransportError::Timeout {
            operation: "read",
            transferred: 0,
        });
        assert!(timeout.is_timeout());

        let failure = TrackerError::from(TransportError::Failure {
            operation: "read",
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
        });
        assert!(!failure.is_timeout());
        assert_eq!(failure.device_code(), None);
    }
}
