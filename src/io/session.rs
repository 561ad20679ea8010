//! Transport session
//!
//! [`TransportSession`] wraps a [`Transport`] and drives every call through
//! the [`TransitionTable`]. Each public method feeds one input, performs the
//! actions the table selects (which may queue follow-up inputs), and returns
//! once a stable state is reached.
//!
//! # Examples
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
//!
//! session.write(b"INIT:E3A5\r")?;
//! let reply = session.read_record()?;
//! assert_eq!(reply, b"OKAYA896\r");
//!
//! session.close()?;
//! assert_eq!(session.state(), State::Idle);
//! # Ok::<(), igt_tracker::error::TrackerError>(())
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::io::capture::{encode_bytes, CaptureLog, Direction};
use crate::io::state_machine::{Action, Entry, Input, Next, State, TransitionTable};
use crate::io::transport::{TransferParameters, Transport};

/// Largest reply accepted by [`TransportSession::read_record`]
pub const MAX_RECORD_LEN: usize = 8192;

/// Advisory signal emitted on every terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The operation finished successfully
    Completed,
    /// A read or write failed
    InputOutputError,
    /// A read or write ran past its deadline
    InputOutputTimeout,
    /// Opening (or configuring) the channel failed
    OpenPortError,
    /// Closing the channel failed
    ClosePortError,
}

/// Receives [`SessionEvent`]s
///
/// Observers are notified synchronously on the calling thread and cannot
/// influence the session.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, operation: &'static str, event: SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&'static str, SessionEvent) + Send + Sync,
{
    fn on_event(&self, operation: &'static str, event: SessionEvent) {
        self(operation, event)
    }
}

/// Platform outcome to table input
const OUTCOMES: &[(io::ErrorKind, Input)] = &[
    (io::ErrorKind::TimedOut, Input::Timeout),
    (io::ErrorKind::WouldBlock, Input::Timeout),
    (io::ErrorKind::BrokenPipe, Input::Failure),
    (io::ErrorKind::ConnectionReset, Input::Failure),
    (io::ErrorKind::ConnectionAborted, Input::Failure),
    (io::ErrorKind::ConnectionRefused, Input::Failure),
    (io::ErrorKind::NotConnected, Input::Failure),
    (io::ErrorKind::AddrNotAvailable, Input::Failure),
    (io::ErrorKind::UnexpectedEof, Input::Failure),
    (io::ErrorKind::PermissionDenied, Input::Failure),
    (io::ErrorKind::NotFound, Input::Failure),
    (io::ErrorKind::InvalidInput, Input::Failure),
    (io::ErrorKind::InvalidData, Input::Failure),
    (io::ErrorKind::WriteZero, Input::Failure),
    (io::ErrorKind::Unsupported, Input::Failure),
    (io::ErrorKind::Interrupted, Input::Failure),
];

/// Map a platform error onto a table input; unmapped kinds fail loudly
pub fn classify_error(kind: io::ErrorKind) -> Input {
    match OUTCOMES.iter().find(|(k, _)| *k == kind) {
        Some((_, input)) => *input,
        None => {
            warn!(?kind, "unmapped transport outcome, treating as failure");
            Input::Failure
        }
    }
}

/// Work item carried through one public call
enum Request<'a> {
    Control,
    Write(&'a [u8]),
    Read { buf: &'a mut Vec<u8>, max: usize },
    Sleep(Duration),
}

struct Attempt<'a> {
    operation: &'static str,
    request: Request<'a>,
    transferred: usize,
    error: Option<TransportError>,
}

/// A communication channel driven by the session transition table
pub struct TransportSession<T: Transport> {
    transport: T,
    table: TransitionTable,
    state: State,
    origin: State,
    params: TransferParameters,
    capture_path: Option<PathBuf>,
    capture: Option<CaptureLog>,
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl<T: Transport> TransportSession<T> {
    /// Create an idle session with default transfer parameters
    pub fn new(transport: T) -> Result<Self> {
        Self::with_parameters(transport, TransferParameters::default())
    }

    /// Create an idle session with the given transfer parameters
    pub fn with_parameters(transport: T, params: TransferParameters) -> Result<Self> {
        Ok(Self {
            transport,
            table: TransitionTable::standard()?,
            state: State::Idle,
            origin: State::Idle,
            params,
            capture_path: None,
            capture: None,
            observers: Vec::new(),
        })
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// True unless the session is idle
    pub fn is_open(&self) -> bool {
        self.state != State::Idle
    }

    /// Transfer parameters applied on open and by `update_parameters`
    pub fn parameters(&self) -> &TransferParameters {
        &self.params
    }

    /// Mutable transfer parameters; call `update_parameters` to apply them
    pub fn parameters_mut(&mut self) -> &mut TransferParameters {
        &mut self.params
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Register an observer for session events
    pub fn add_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    /// Record all traffic to `path` (or stop recording with `None`)
    ///
    /// Takes effect immediately on an open session, otherwise on the next open.
    pub fn set_capture_file(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.capture = None;
        self.capture_path = path;
        if self.is_open() {
            self.start_capture()?;
        }
        Ok(())
    }

    /// Entries written to the capture log since it was opened
    pub fn capture_sequence(&self) -> Option<u64> {
        self.capture.as_ref().map(CaptureLog::sequence)
    }

    /// Open the channel and apply the transfer parameters
    ///
    /// On success the session is `ReadyForCommunication`. If the channel
    /// opens but the parameters cannot be applied, the session stays in
    /// `PortOpen` and the error is returned.
    pub fn open(&mut self) -> Result<()> {
        debug!("Opening {}", self.transport.describe());
        self.drive("open", Input::OpenPort, Request::Control)?;
        Ok(())
    }

    /// Close the channel; a no-op on an idle session
    pub fn close(&mut self) -> Result<()> {
        self.drive("close", Input::ClosePort, Request::Control)?;
        Ok(())
    }

    /// Re-apply the transfer parameters without closing
    pub fn update_parameters(&mut self) -> Result<()> {
        self.drive("update_parameters", Input::UpdateParameters, Request::Control)?;
        Ok(())
    }

    /// Write a complete payload
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.drive("write", Input::Write, Request::Write(data))
    }

    /// Append up to `max` bytes to `buf`, returning how many were read
    ///
    /// Reading stops after the read terminator when one is configured. On a
    /// timeout the bytes received so far remain in `buf`.
    pub fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> Result<usize> {
        self.drive("read", Input::Read, Request::Read { buf, max })
    }

    /// Read one terminated record
    pub fn read_record(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(&mut buf, MAX_RECORD_LEN)?;
        Ok(buf)
    }

    /// Pause inside the session
    pub fn sleep(&mut self, duration: Duration) -> Result<()> {
        self.drive("sleep", Input::Sleep, Request::Sleep(duration))?;
        Ok(())
    }

    /// Drop input the device sent that no read has consumed
    ///
    /// Only valid on a ready session. The state does not change, so this
    /// does not pass through the transition table.
    pub fn discard_input(&mut self) -> Result<()> {
        if self.state != State::ReadyForCommunication {
            return Err(self.rejection("discard_input").into());
        }
        self.transport.discard_input().map_err(|source| {
            debug!("discarding input failed: {}", source);
            TransportError::Failure {
                operation: "discard_input",
                source,
            }
        })?;
        trace!("discarded unread input");
        Ok(())
    }

    fn drive(&mut self, operation: &'static str, input: Input, request: Request<'_>) -> Result<usize> {
        let mut attempt = Attempt {
            operation,
            request,
            transferred: 0,
            error: None,
        };

        let (mut next, mut action) = match self.table.lookup(self.state, input) {
            Entry::Transition { next, action } => (next, action),
            Entry::Reject => return Err(self.rejection(operation).into()),
        };
        let mut input = input;

        loop {
            let from = self.state;
            let to = match next {
                Next::To(state) => state,
                Next::Resume => self.origin,
            };
            if from.is_stable() && !to.is_stable() {
                self.origin = from;
            }
            self.state = to;
            trace!(%from, %input, %to, ?action, "session transition");

            let Some(follow_up) = self.perform(action, &mut attempt) else {
                break;
            };
            input = follow_up;
            match self.table.lookup(self.state, input) {
                Entry::Transition { next: n, action: a } => {
                    next = n;
                    action = a;
                }
                Entry::Reject => {
                    warn!(state = %self.state, %input, "follow-up input rejected");
                    return Err(self.rejection(operation).into());
                }
            }
        }

        match attempt.error {
            Some(err) => Err(err.into()),
            None => Ok(attempt.transferred),
        }
    }

    fn rejection(&self, operation: &'static str) -> TransportError {
        if self.state == State::Idle {
            TransportError::NotOpen { operation }
        } else {
            TransportError::InvalidState {
                operation,
                state: self.state,
            }
        }
    }

    /// Run one action; returns the input it produces, if any
    fn perform(&mut self, action: Action, attempt: &mut Attempt<'_>) -> Option<Input> {
        match action {
            Action::AttemptOpen => {
                let result = self.transport.open_port(&self.params);
                Some(self.settle(result.map(|_| 0), attempt))
            }
            Action::OpenSucceeded => {
                if let Err(err) = self.start_capture() {
                    warn!("capture log unavailable: {}", err);
                }
                Some(Input::UpdateParameters)
            }
            Action::OpenFailed => {
                self.notify(attempt.operation, SessionEvent::OpenPortError);
                None
            }
            Action::AttemptUpdateParameters => {
                let result = self.transport.update_parameters(&self.params);
                Some(self.settle(result.map(|_| 0), attempt))
            }
            Action::UpdateSucceeded => {
                self.notify(attempt.operation, SessionEvent::Completed);
                None
            }
            Action::UpdateFailed => {
                self.notify(attempt.operation, SessionEvent::OpenPortError);
                None
            }
            Action::AttemptClose => {
                let result = self.transport.close_port();
                Some(self.settle(result.map(|_| 0), attempt))
            }
            Action::CloseSucceeded => {
                self.capture = None;
                self.notify(attempt.operation, SessionEvent::Completed);
                None
            }
            Action::CloseFailed => {
                self.notify(attempt.operation, SessionEvent::ClosePortError);
                None
            }
            Action::AttemptWrite => {
                let Request::Write(data) = attempt.request else {
                    return Some(Input::Failure);
                };
                self.capture_entry(Direction::Command, data);
                trace!("write {}", encode_bytes(data));
                let result = self.transport.write(data, self.params.timeout);
                Some(self.settle(result, attempt))
            }
            Action::AttemptRead => {
                let Request::Read { ref mut buf, max } = attempt.request else {
                    return Some(Input::Failure);
                };
                let start = buf.len();
                let result = self.transport.read(
                    buf,
                    max,
                    self.params.read_terminator,
                    self.params.timeout,
                );
                let received = buf.len() - start;
                self.capture_entry(Direction::Receive, &buf[start..]);
                trace!("read {}", encode_bytes(&buf[start..]));
                attempt.transferred = received;
                Some(self.settle(result.map(|_| received), attempt))
            }
            Action::Sleep => {
                if let Request::Sleep(duration) = attempt.request {
                    self.transport.sleep(duration);
                }
                Some(Input::Success)
            }
            Action::Completed => {
                self.notify(attempt.operation, SessionEvent::Completed);
                None
            }
            Action::Failed => {
                self.notify(attempt.operation, SessionEvent::InputOutputError);
                None
            }
            Action::TimedOut => {
                self.notify(attempt.operation, SessionEvent::InputOutputTimeout);
                None
            }
            Action::Ignore => None,
        }
    }

    /// Record a platform result in the attempt and pick the next input
    fn settle(&self, result: io::Result<usize>, attempt: &mut Attempt<'_>) -> Input {
        let err = match result {
            Ok(n) => {
                attempt.transferred = n;
                return Input::Success;
            }
            Err(err) => err,
        };

        let mut input = classify_error(err.kind());
        // open/close/update have no timeout outcome
        if input == Input::Timeout && self.table.lookup(self.state, Input::Timeout) == Entry::Reject {
            input = Input::Failure;
        }

        attempt.error = Some(match input {
            Input::Timeout => TransportError::Timeout {
                operation: attempt.operation,
                transferred: attempt.transferred,
            },
            _ => TransportError::Failure {
                operation: attempt.operation,
                source: err,
            },
        });
        debug!(
            operation = attempt.operation,
            state = %self.state,
            %input,
            "transport operation did not succeed"
        );
        input
    }

    fn start_capture(&mut self) -> Result<()> {
        if let Some(path) = &self.capture_path {
            self.capture = Some(CaptureLog::create(path)?);
            debug!("Capturing traffic to {}", path.display());
        }
        Ok(())
    }

    fn capture_entry(&mut self, direction: Direction, bytes: &[u8]) {
        if let Some(capture) = self.capture.as_mut() {
            if let Err(err) = capture.record(direction, bytes) {
                warn!("capture write failed, disabling capture: {}", err);
                self.capture = None;
            }
        }
    }

    fn notify(&self, operation: &'static str, event: SessionEvent) {
        for observer in &self.observers {
            observer.on_event(operation, event);
        }
    }
}

impl<T: Transport> Drop for TransportSession<T> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.close() {
                debug!("close on drop failed: {}", err);
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for TransportSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("endpoint", &self.transport.describe())
            .field("state", &self.state)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
