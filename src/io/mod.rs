//! Device I/O
//!
//! Byte transports (serial port, TCP socket, simulated device), the session
//! state machine that supervises every transfer, and traffic capture.
//!
//! # Sessions
//!
//! A [`TransportSession`] wraps any [`Transport`] and routes open, close,
//! parameter updates, reads and writes through the transition table in
//! [`state_machine`]:
//!
//! ```
//! use igt_tracker::io::session::TransportSession;
//! use igt_tracker::io::simulator::SimulatedDevice;
//! use igt_tracker::io::state_machine::State;
//!
//! let (device, _control) = SimulatedDevice::new();
//! let mut session = TransportSession::new(device)?;
//! session.open()?;
//! assert_eq!(session.state(), State::ReadyForCommunication);
//! session.close()?;
//! assert_eq!(session.state(), State::Idle);
//! # Ok::<(), igt_tracker::error::TrackerError>(())
//! ```

pub mod builder;
pub mod capture;
pub mod serial;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state_machine;
pub mod transport;

pub use builder::TrackerBuilder;
pub use capture::CaptureLog;
pub use serial::SerialTransport;
pub use session::{SessionEvent, SessionObserver, TransportSession};
pub use simulator::SimulatedDevice;
pub use socket::SocketTransport;
pub use state_machine::{State, TransitionTable};
pub use transport::{TransferParameters, Transport};
