//! Circuit breaker state machine implementation.

use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// Circuit is letting calls through to probe whether the dependency recovered.
    HalfOpen,
}

impl State {
    /// Upper-case label used in log lines, events and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Open => "OPEN",
            State::HalfOpen => "HALF_OPEN",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition that happened while the breaker lock was held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
}

/// Owns the current state and records every real transition.
///
/// Lives inside the breaker's mutex together with the policy counters, so the
/// compare-then-write in [`StateMachine::change_state`] is atomic with respect
/// to the rest of the accounting. Transitions are buffered and drained by the
/// breaker before it gives up the lock, which is where the events go out.
#[derive(Debug)]
pub struct StateMachine {
    state: State,
    pending: SmallVec<[Transition; 2]>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Creates a new state machine in the closed state.
    pub fn new() -> Self {
        Self {
            state: State::Closed,
            pending: SmallVec::new(),
        }
    }

    /// Gets the current state.
    pub fn current(&self) -> State {
        self.state
    }

    /// Moves to `to`. Returns false and records nothing when already there.
    pub fn change_state(&mut self, to: State) -> bool {
        if self.state == to {
            return false;
        }

        let from = self.state;
        self.state = to;
        self.pending.push(Transition { from, to });
        true
    }

    /// Drains the transitions recorded since the last call, oldest first.
    pub(crate) fn take_transitions(&mut self) -> SmallVec<[Transition; 2]> {
        std::mem::take(&mut self.pending)
    }
}
