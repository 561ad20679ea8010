//! Integration tests for the transport session state machine
//!
//! Drives a session over the simulated device and checks the reachable
//! states, notifications and error classification.

use igt_tracker::error::{TrackerError, TransportError};
use igt_tracker::io::session::{SessionEvent, TransportSession};
use igt_tracker::io::simulator::{Fault, SimulatedDevice};
use igt_tracker::io::state_machine::{Entry, Input, Next, State, TransitionTable};
use igt_tracker::protocol::command::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Events = Arc<Mutex<Vec<(&'static str, SessionEvent)>>>;

fn observed_session() -> (
    TransportSession<SimulatedDevice>,
    igt_tracker::io::simulator::DeviceControl,
    Events,
) {
    let (device, control) = SimulatedDevice::new();
    let mut session = TransportSession::new(device).unwrap();
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    session.add_observer(Arc::new(move |operation: &'static str, event: SessionEvent| {
        sink.lock().unwrap().push((operation, event));
    }));
    (session, control, events)
}

#[test]
fn test_every_state_has_required_inputs() {
    let table = TransitionTable::standard().unwrap();
    let required: &[(State, &[Input])] = &[
        (State::Idle, &[Input::OpenPort]),
        (State::AttemptingOpen, &[Input::Success, Input::Failure]),
        (State::PortOpen, &[Input::UpdateParameters, Input::ClosePort]),
        (State::ReadyForCommunication, &[Input::Read, Input::Write, Input::ClosePort, Input::Sleep]),
        (State::AttemptingRead, &[Input::Success, Input::Failure, Input::Timeout]),
        (State::AttemptingWrite, &[Input::Success, Input::Failure, Input::Timeout]),
        (State::AttemptingClose, &[Input::Success, Input::Failure]),
        (State::Sleeping, &[Input::Success]),
    ];
    for &(state, inputs) in required {
        for &input in inputs {
            assert_ne!(table.lookup(state, input), Entry::Reject, "{} / {}", state, input);
        }
    }
    // I/O is not possible before the channel is configured
    assert_eq!(table.lookup(State::PortOpen, Input::Read), Entry::Reject);
    assert_eq!(table.lookup(State::Idle, Input::Write), Entry::Reject);
    assert!(matches!(
        table.lookup(State::AttemptingClose, Input::Failure),
        Entry::Transition { next: Next::Resume, .. }
    ));
}

#[test]
fn test_open_exchange_close() {
    let (mut session, _control, events) = observed_session();
    assert_eq!(session.state(), State::Idle);

    session.open().unwrap();
    assert_eq!(session.state(), State::ReadyForCommunication);

    session.write(&Command::Init.encode()).unwrap();
    assert_eq!(session.read_record().unwrap(), b"OKAYA896\r");
    session.sleep(Duration::from_millis(5)).unwrap();

    session.close().unwrap();
    assert_eq!(session.state(), State::Idle);

    let events = events.lock().unwrap();
    assert!(events.iter().all(|(_, e)| *e == SessionEvent::Completed));
    assert_eq!(events.len(), 5);
}

#[test]
fn test_io_before_open_rejected() {
    let (mut session, control, events) = observed_session();
    let err = session.write(b"INIT:E3A5\r").unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Transport(TransportError::NotOpen { operation: "write" })
    ));
    assert!(session.read_record().is_err());
    assert!(session.sleep(Duration::ZERO).is_err());
    assert_eq!(session.state(), State::Idle);
    assert!(events.lock().unwrap().is_empty());
    assert!(control.commands().is_empty());
}

#[test]
fn test_refused_open_returns_to_idle() {
    let (mut session, control, events) = observed_session();
    control.refuse_open(true);

    assert!(session.open().is_err());
    assert_eq!(session.state(), State::Idle);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[("open", SessionEvent::OpenPortError)]
    );

    control.refuse_open(false);
    session.open().unwrap();
    assert!(session.is_open());
}

#[test]
fn test_failed_configuration_leaves_port_open() {
    let (mut session, control, events) = observed_session();
    control.fail_update(true);

    assert!(session.open().is_err());
    assert_eq!(session.state(), State::PortOpen);
    assert!(matches!(
        session.write(b"x"),
        Err(TrackerError::Transport(TransportError::InvalidState { state: State::PortOpen, .. }))
    ));
    assert_eq!(
        events.lock().unwrap().last(),
        Some(&("open", SessionEvent::OpenPortError))
    );

    control.fail_update(false);
    session.update_parameters().unwrap();
    assert_eq!(session.state(), State::ReadyForCommunication);
    session.close().unwrap();
}

#[test]
fn test_read_timeout_keeps_session_ready() {
    let (mut session, _control, events) = observed_session();
    session.open().unwrap();
    events.lock().unwrap().clear();

    // nothing was written, so nothing to read
    let err = session.read_record().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(session.state(), State::ReadyForCommunication);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[("read", SessionEvent::InputOutputTimeout)]
    );

    session.write(&Command::Init.encode()).unwrap();
    assert!(session.read_record().is_ok());
}

#[test]
fn test_write_failure_reports_io_error() {
    let (mut session, control, events) = observed_session();
    session.open().unwrap();
    events.lock().unwrap().clear();
    control.inject(Fault::Io);

    let err = session.write(&Command::Init.encode()).unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Transport(TransportError::Failure { operation: "write", .. })
    ));
    assert_eq!(session.state(), State::ReadyForCommunication);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[("write", SessionEvent::InputOutputError)]
    );
}

#[test]
fn test_reopen_after_close() {
    let (mut session, control, _events) = observed_session();
    for _ in 0..3 {
        session.open().unwrap();
        assert!(control.is_open());
        session.close().unwrap();
        assert!(!control.is_open());
    }
    // closing an idle session is a no-op
    session.close().unwrap();
    assert_eq!(session.state(), State::Idle);
}

#[test]
fn test_dot_export_names_every_state() {
    let dot = TransitionTable::standard().unwrap().to_dot("Session");
    for state in State::ALL {
        assert!(dot.contains(&state.to_string()), "{} missing", state);
    }
}
