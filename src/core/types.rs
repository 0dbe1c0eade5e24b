//! Core domain types: resource identifiers and the lifecycle state space
//!
//! Every legal non-terminal lifecycle state has a corrupted mirror. States
//! also carry a stable numeric code so that callers speaking in raw integers
//! (persistence rows, wire messages) can be validated before use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a VM resource as known to the resource home
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create an identifier from an existing key
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Legal non-terminal lifecycle states of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Image not yet staged
    Unstaged,
    /// Image staged but not propagated to the VMM
    Unpropagated,
    /// Image present at the VMM
    Propagated,
    /// VM running
    Running,
    /// VM state serialized to disk
    Serialized,
    /// VM paused in memory
    Paused,
    /// VM shut down and image ready to be transported off the VMM
    TransportReady,
    /// Image staged out
    StagedOut,
}

impl LifecycleState {
    /// Every lifecycle state, in code order
    pub const ALL: [LifecycleState; 8] = [
        LifecycleState::Unstaged,
        LifecycleState::Unpropagated,
        LifecycleState::Propagated,
        LifecycleState::Running,
        LifecycleState::Serialized,
        LifecycleState::Paused,
        LifecycleState::TransportReady,
        LifecycleState::StagedOut,
    ];

    /// Numeric code (1..=8)
    pub fn code(self) -> i32 {
        match self {
            LifecycleState::Unstaged => 1,
            LifecycleState::Unpropagated => 2,
            LifecycleState::Propagated => 3,
            LifecycleState::Running => 4,
            LifecycleState::Serialized => 5,
            LifecycleState::Paused => 6,
            LifecycleState::TransportReady => 7,
            LifecycleState::StagedOut => 8,
        }
    }

    /// Inverse of [`LifecycleState::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Unstaged => "Unstaged",
            LifecycleState::Unpropagated => "Unpropagated",
            LifecycleState::Propagated => "Propagated",
            LifecycleState::Running => "Running",
            LifecycleState::Serialized => "Serialized",
            LifecycleState::Paused => "Paused",
            LifecycleState::TransportReady => "TransportReady",
            LifecycleState::StagedOut => "StagedOut",
        }
    }
}

/// Offset between a lifecycle code and its corrupted mirror
pub const CORRUPTED_OFFSET: i32 = 100;

/// Complete state space of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// A legal non-terminal state
    Lifecycle(LifecycleState),
    /// A job targeting the inner state failed
    Corrupted(LifecycleState),
    /// A job failed while targeting a state with no corrupted mirror
    CorruptedGeneric,
    /// A cancellation is in flight
    Cancelling,
    /// Destruction is in flight
    Destroying,
    /// Destruction finished (terminal)
    DestroySucceeded,
    /// Destruction failed (terminal)
    DestroyFailed,
}

impl State {
    /// Shorthand for `State::Lifecycle(LifecycleState::Running)`
    pub const RUNNING: State = State::Lifecycle(LifecycleState::Running);

    /// Numeric code of this state
    pub fn code(self) -> i32 {
        match self {
            State::Lifecycle(s) => s.code(),
            State::Corrupted(s) => CORRUPTED_OFFSET + s.code(),
            State::CorruptedGeneric => CORRUPTED_OFFSET,
            State::Cancelling => 20,
            State::Destroying => 30,
            State::DestroySucceeded => 31,
            State::DestroyFailed => 32,
        }
    }

    /// Decode a numeric state; `None` if the code is not a state at all
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            20 => Some(State::Cancelling),
            30 => Some(State::Destroying),
            31 => Some(State::DestroySucceeded),
            32 => Some(State::DestroyFailed),
            CORRUPTED_OFFSET => Some(State::CorruptedGeneric),
            c if c > CORRUPTED_OFFSET => {
                LifecycleState::from_code(c - CORRUPTED_OFFSET).map(State::Corrupted)
            }
            c => LifecycleState::from_code(c).map(State::Lifecycle),
        }
    }

    /// The failure mirror of this state
    pub fn corrupted(self) -> State {
        match self {
            State::Lifecycle(s) => State::Corrupted(s),
            _ => State::CorruptedGeneric,
        }
    }

    /// Whether a job may name this state as the one it is driving towards
    pub fn is_valid_target(self) -> bool {
        matches!(
            self,
            State::Lifecycle(_) | State::Cancelling | State::Destroying
        )
    }

    /// True for every corrupted variant
    pub fn is_corrupted(self) -> bool {
        matches!(self, State::Corrupted(_) | State::CorruptedGeneric)
    }

    /// True once the resource can no longer change state
    pub fn is_terminal(self) -> bool {
        matches!(self, State::DestroySucceeded | State::DestroyFailed)
    }
}

impl From<LifecycleState> for State {
    fn from(state: LifecycleState) -> Self {
        State::Lifecycle(state)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Lifecycle(s) => f.write_str(s.name()),
            State::Corrupted(s) => write!(f, "{}-corrupted", s.name()),
            State::CorruptedGeneric => f.write_str("Corrupted"),
            State::Cancelling => f.write_str("Cancelling"),
            State::Destroying => f.write_str("Destroying"),
            State::DestroySucceeded => f.write_str("DestroySucceeded"),
            State::DestroyFailed => f.write_str("DestroyFailed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn every_state_code_decodes_to_itself() {
        let mut states: Vec<State> = LifecycleState::ALL.iter().map(|s| State::from(*s)).collect();
        states.extend(LifecycleState::ALL.iter().map(|s| State::Corrupted(*s)));
        states.extend([
            State::CorruptedGeneric,
            State::Cancelling,
            State::Destroying,
            State::DestroySucceeded,
            State::DestroyFailed,
        ]);
        for state in states {
            assert_eq!(State::from_code(state.code()), Some(state), "{}", state);
        }
    }

    #[test]
    fn corrupted_mirror() {
        assert_eq!(
            State::RUNNING.corrupted(),
            State::Corrupted(LifecycleState::Running)
        );
        assert_eq!(State::Cancelling.corrupted(), State::CorruptedGeneric);
        assert_eq!(State::RUNNING.corrupted().to_string(), "Running-corrupted");
    }

    #[test]
    fn only_in_flight_states_are_targets() {
        assert!(State::RUNNING.is_valid_target());
        assert!(State::Destroying.is_valid_target());
        assert!(!State::DestroyFailed.is_valid_target());
        assert!(!State::CorruptedGeneric.is_valid_target());
    }

    proptest! {
        #[test]
        fn decoded_codes_round_trip(code in -1000i32..1000) {
            if let Some(state) = State::from_code(code) {
                prop_assert_eq!(state.code(), code);
            }
        }
    }
}
