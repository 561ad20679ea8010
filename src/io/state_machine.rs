//! Transition table for the transport session
//!
//! The session is driven by an explicit `(State, Input) -> Entry` table.
//! Every pair has an entry: either a transition (next state + action) or an
//! explicit rejection. The table is validated when it is built, and can be
//! exported as a Graphviz description for documentation.
//!
//! ```text
//! Idle ──OpenPort──▶ AttemptingOpen ──Success──▶ PortOpen ──UpdateParameters──▶ AttemptingUpdateParameters
//!  ▲                      │ Failure                                                  │ Success
//!  └──────────────────────┘                                                          ▼
//!                                    Sleeping ◀──Sleep── ReadyForCommunication ──Read/Write──▶ AttemptingRead/Write
//! ```

use std::fmt;

use thiserror::Error;

const STATE_COUNT: usize = 9;
const INPUT_COUNT: usize = 9;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    AttemptingOpen,
    PortOpen,
    AttemptingUpdateParameters,
    ReadyForCommunication,
    AttemptingClose,
    AttemptingRead,
    AttemptingWrite,
    Sleeping,
}

impl State {
    pub const ALL: [State; STATE_COUNT] = [
        State::Idle,
        State::AttemptingOpen,
        State::PortOpen,
        State::AttemptingUpdateParameters,
        State::ReadyForCommunication,
        State::AttemptingClose,
        State::AttemptingRead,
        State::AttemptingWrite,
        State::Sleeping,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// States a public call may start from and return to
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            State::Idle | State::PortOpen | State::ReadyForCommunication
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    Success,
    Failure,
    Timeout,
    OpenPort,
    UpdateParameters,
    ClosePort,
    Sleep,
    Write,
    Read,
}

impl Input {
    pub const ALL: [Input; INPUT_COUNT] = [
        Input::Success,
        Input::Failure,
        Input::Timeout,
        Input::OpenPort,
        Input::UpdateParameters,
        Input::ClosePort,
        Input::Sleep,
        Input::Write,
        Input::Read,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Work performed when a transition fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AttemptOpen,
    OpenSucceeded,
    OpenFailed,
    AttemptUpdateParameters,
    UpdateSucceeded,
    UpdateFailed,
    AttemptClose,
    CloseSucceeded,
    CloseFailed,
    AttemptRead,
    AttemptWrite,
    Sleep,
    Completed,
    Failed,
    TimedOut,
    /// Accept the input without doing anything
    Ignore,
}

/// Where a transition leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    To(State),
    /// Back to the stable state the current attempt started from
    Resume,
}

/// Table entry for one `(state, input)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Transition { next: Next, action: Action },
    Reject,
}

/// Table construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("duplicate transition for ({0}, {1})")]
    Duplicate(State, Input),
    #[error("state {0} must handle input {1}")]
    Unhandled(State, Input),
}

/// Transitions of the transport session
const TRANSITIONS: &[(State, Input, Next, Action)] = &[
    // Idle
    (State::Idle, Input::OpenPort, Next::To(State::AttemptingOpen), Action::AttemptOpen),
    (State::Idle, Input::ClosePort, Next::To(State::Idle), Action::Ignore),
    // AttemptingOpen
    (State::AttemptingOpen, Input::Success, Next::To(State::PortOpen), Action::OpenSucceeded),
    (State::AttemptingOpen, Input::Failure, Next::To(State::Idle), Action::OpenFailed),
    // PortOpen
    (State::PortOpen, Input::UpdateParameters, Next::To(State::AttemptingUpdateParameters), Action::AttemptUpdateParameters),
    (State::PortOpen, Input::ClosePort, Next::To(State::AttemptingClose), Action::AttemptClose),
    // AttemptingUpdateParameters
    (State::AttemptingUpdateParameters, Input::Success, Next::To(State::ReadyForCommunication), Action::UpdateSucceeded),
    (State::AttemptingUpdateParameters, Input::Failure, Next::Resume, Action::UpdateFailed),
    // ReadyForCommunication
    (State::ReadyForCommunication, Input::Sleep, Next::To(State::Sleeping), Action::Sleep),
    (State::ReadyForCommunication, Input::Write, Next::To(State::AttemptingWrite), Action::AttemptWrite),
    (State::ReadyForCommunication, Input::Read, Next::To(State::AttemptingRead), Action::AttemptRead),
    (State::ReadyForCommunication, Input::ClosePort, Next::To(State::AttemptingClose), Action::AttemptClose),
    (State::ReadyForCommunication, Input::UpdateParameters, Next::To(State::AttemptingUpdateParameters), Action::AttemptUpdateParameters),
    // AttemptingRead
    (State::AttemptingRead, Input::Success, Next::To(State::ReadyForCommunication), Action::Completed),
    (State::AttemptingRead, Input::Failure, Next::To(State::ReadyForCommunication), Action::Failed),
    (State::AttemptingRead, Input::Timeout, Next::To(State::ReadyForCommunication), Action::TimedOut),
    // AttemptingWrite
    (State::AttemptingWrite, Input::Success, Next::To(State::ReadyForCommunication), Action::Completed),
    (State::AttemptingWrite, Input::Failure, Next::To(State::ReadyForCommunication), Action::Failed),
    (State::AttemptingWrite, Input::Timeout, Next::To(State::ReadyForCommunication), Action::TimedOut),
    // AttemptingClose
    (State::AttemptingClose, Input::Success, Next::To(State::Idle), Action::CloseSucceeded),
    (State::AttemptingClose, Input::Failure, Next::Resume, Action::CloseFailed),
    // Sleeping
    (State::Sleeping, Input::Success, Next::To(State::ReadyForCommunication), Action::Completed),
];

/// Inputs each state is required to accept
const REQUIRED: &[(State, &[Input])] = &[
    (State::Idle, &[Input::OpenPort]),
    (State::AttemptingOpen, &[Input::Success, Input::Failure]),
    (State::PortOpen, &[Input::UpdateParameters, Input::ClosePort]),
    (State::AttemptingUpdateParameters, &[Input::Success, Input::Failure]),
    (
        State::ReadyForCommunication,
        &[Input::Read, Input::Write, Input::ClosePort, Input::Sleep],
    ),
    (State::AttemptingClose, &[Input::Success, Input::Failure]),
    (State::AttemptingRead, &[Input::Success, Input::Failure, Input::Timeout]),
    (State::AttemptingWrite, &[Input::Success, Input::Failure, Input::Timeout]),
    (State::Sleeping, &[Input::Success]),
];

/// Dense `(state, input)` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    entries: [[Entry; INPUT_COUNT]; STATE_COUNT],
}

impl TransitionTable {
    /// The transport session table
    pub fn standard() -> Result<Self, TableError> {
        Self::from_transitions(TRANSITIONS, REQUIRED)
    }

    /// Build a table from a transition list; unlisted pairs are rejected
    ///
    /// Fails if a pair is listed twice or a state does not accept one of
    /// its required inputs.
    pub fn from_transitions(
        transitions: &[(State, Input, Next, Action)],
        required: &[(State, &[Input])],
    ) -> Result<Self, TableError> {
        let mut entries = [[Entry::Reject; INPUT_COUNT]; STATE_COUNT];

        for &(state, input, next, action) in transitions {
            let slot = &mut entries[state.index()][input.index()];
            if *slot != Entry::Reject {
                return Err(TableError::Duplicate(state, input));
            }
            *slot = Entry::Transition { next, action };
        }

        for &(state, inputs) in required {
            for &input in inputs {
                if entries[state.index()][input.index()] == Entry::Reject {
                    return Err(TableError::Unhandled(state, input));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Entry for a pair
    pub fn lookup(&self, state: State, input: Input) -> Entry {
        self.entries[state.index()][input.index()]
    }

    /// All non-rejecting transitions
    pub fn transitions(&self) -> impl Iterator<Item = (State, Input, Next, Action)> + '_ {
        State::ALL.iter().flat_map(move |&state| {
            Input::ALL
                .iter()
                .filter_map(move |&input| match self.lookup(state, input) {
                    Entry::Transition { next, action } => Some((state, input, next, action)),
                    Entry::Reject => None,
                })
        })
    }

    /// Graphviz description of the table
    ///
    /// `Resume` transitions are drawn dashed back to every stable state
    /// that can enter the source state.
    pub fn to_dot(&self, name: &str) -> String {
        let mut out = format!("digraph {} {{\n  rankdir=LR;\n", name);
        out.push_str("  Idle [shape=doublecircle];\n");
        for (state, input, next, action) in self.transitions() {
            match next {
                Next::To(target) => out.push_str(&format!(
                    "  {} -> {} [label=\"{} / {:?}\"];\n",
                    state, target, input, action
                )),
                Next::Resume => {
                    for origin in self.predecessors(state) {
                        out.push_str(&format!(
                            "  {} -> {} [label=\"{} / {:?}\", style=dashed];\n",
                            state, origin, input, action
                        ));
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }

    fn predecessors(&self, target: State) -> Vec<State> {
        let mut states: Vec<State> = self
            .transitions()
            .filter(|(state, _, next, _)| state.is_stable() && *next == Next::To(target))
            .map(|(state, ..)| state)
            .collect();
        states.dedup();
        states
    }
}
