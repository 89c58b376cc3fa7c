//! Relay session state machine.
//!
//! Every session walks the same path:
//!
//! ```text
//! Connecting ──> Active ──> Closing ──> Closed
//!      │                                  ^
//!      └──────── connect failure ─────────┘
//! ```
//!
//! - `Connecting`: the connect attempt is in flight
//! - `Active`: both forwarders run, downlink records reach local output
//! - `Closing`: the completion signal fired; forwarders are being stopped
//!   and the connection is shut down
//! - `Closed`: terminal, nothing is written on behalf of the session
//!
//! The coordinator drives the machine; the recorded history ends up in the
//! session report, which is how tests observe that a session entered
//! `Closing` exactly once.
//!
//! # Examples
//!
//! ```
//! use tether_network::{SessionState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! assert_eq!(machine.current_state(), SessionState::Connecting);
//!
//! machine.transition_to(SessionState::Active).unwrap();
//! assert!(machine.transition_to(SessionState::Connecting).is_err());
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use tether_core::{Error, Result};

/// Lifecycle state of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connect attempt in flight.
    Connecting,

    /// Connected; both forwarders running.
    Active,

    /// Completion signal observed; tearing down.
    Closing,

    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SessionState::Connecting => "Connecting",
            SessionState::Active => "Active",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        };
        write!(f, "{}", state_str)
    }
}

impl SessionState {
    /// Check if transition to target state is valid from this state.
    ///
    /// ```
    /// use tether_network::SessionState;
    ///
    /// assert!(SessionState::Connecting.can_transition_to(&SessionState::Closed));
    /// assert!(!SessionState::Active.can_transition_to(&SessionState::Closed));
    /// ```
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Connecting, SessionState::Active | SessionState::Closed)
                | (SessionState::Active, SessionState::Closing)
                | (SessionState::Closing, SessionState::Closed)
        )
    }

    /// Whether no transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state transitioned from.
    pub from: SessionState,

    /// The state transitioned to.
    pub to: SessionState,

    /// Time since the state machine was created.
    pub at: Duration,
}

/// State machine for a single relay session.
///
/// Not thread-safe; owned by the session coordinator.
#[derive(Debug)]
pub struct StateMachine {
    current_state: SessionState,
    started_at: Instant,
    state_entered_at: Instant,
    history: Vec<StateTransition>,
}

impl StateMachine {
    /// Create a new state machine in the `Connecting` state.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            current_state: SessionState::Connecting,
            started_at: now,
            state_entered_at: now,
            history: Vec::with_capacity(3),
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.current_state
    }

    /// Time elapsed in the current state.
    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Transitions recorded so far, oldest first.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Number of recorded transitions into `state`.
    pub fn entries_into(&self, state: SessionState) -> usize {
        self.history.iter().filter(|t| t.to == state).count()
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the transition is not
    /// allowed from the current state. The state is left unchanged.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<&StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        debug!(
            from = %self.current_state,
            to = %new_state,
            time_in_state_ms = self.time_in_current_state().as_millis() as u64,
            "Session state transition"
        );

        let now = Instant::now();
        self.history.push(StateTransition {
            from: self.current_state,
            to: new_state,
            at: now.duration_since(self.started_at),
        });
        self.current_state = new_state;
        self.state_entered_at = now;

        Ok(&self.history[self.history.len() - 1])
    }

    /// Consume the machine, returning its history.
    pub fn into_history(self) -> Vec<StateTransition> {
        self.history
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_initial_state() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), SessionState::Connecting);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut machine = StateMachine::new();
        machine.transition_to(SessionState::Active).unwrap();
        machine.transition_to(SessionState::Closing).unwrap();
        machine.transition_to(SessionState::Closed).unwrap();

        let path: Vec<_> = machine.history().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![SessionState::Active, SessionState::Closing, SessionState::Closed]
        );
        assert!(machine.current_state().is_terminal());
        assert_eq!(machine.entries_into(SessionState::Closing), 1);
    }

    #[test]
    fn test_connect_failure_path() {
        let mut machine = StateMachine::new();
        let transition = machine.transition_to(SessionState::Closed).unwrap();
        assert_eq!(transition.from, SessionState::Connecting);
        assert_eq!(transition.to, SessionState::Closed);
    }

    #[rstest]
    #[case(SessionState::Connecting, SessionState::Closing)]
    #[case(SessionState::Active, SessionState::Closed)]
    #[case(SessionState::Active, SessionState::Connecting)]
    #[case(SessionState::Closing, SessionState::Active)]
    #[case(SessionState::Closed, SessionState::Connecting)]
    #[case(SessionState::Closing, SessionState::Closing)]
    fn test_invalid_transitions(#[case] from: SessionState, #[case] to: SessionState) {
        assert!(!from.can_transition_to(&to));
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut machine = StateMachine::new();
        machine.transition_to(SessionState::Active).unwrap();

        let err = machine.transition_to(SessionState::Closed).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(machine.current_state(), SessionState::Active);
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_closing_entered_once() {
        let mut machine = StateMachine::new();
        machine.transition_to(SessionState::Active).unwrap();
        machine.transition_to(SessionState::Closing).unwrap();
        assert!(machine.transition_to(SessionState::Closing).is_err());
        assert_eq!(machine.entries_into(SessionState::Closing), 1);
    }

    #[test]
    fn test_history_timestamps_are_monotonic() {
        let mut machine = StateMachine::new();
        machine.transition_to(SessionState::Active).unwrap();
        machine.transition_to(SessionState::Closing).unwrap();

        let history = machine.into_history();
        assert!(history[0].at <= history[1].at);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Closing).unwrap();
        assert_eq!(json, "\"closing\"");
    }
}
