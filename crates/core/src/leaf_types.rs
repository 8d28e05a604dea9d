//! Leaf lifecycle types
//!
//! A leaf is one executable test body reached by one path from the root.
//! Every leaf execution walks the same state machine:
//!
//! ```text
//! Pending -> SetupRunning -> BodyRunning -> TeardownRunning -> Done
//!                 |               |                |
//!                 +---------------+----------------+--> Failed / Skipped
//! ```
//!
//! - `TeardownRunning` is entered unconditionally once any setup started,
//!   whether the body succeeded, failed, panicked or skipped.
//! - `Failed` is reachable from every running state.
//! - `Skipped` is only final after teardowns ran.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Execution state of a single leaf run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafState {
    /// Not started yet
    Pending,
    /// Running the root-to-leaf setup chain
    SetupRunning,
    /// Running the test body
    BodyRunning,
    /// Unwinding teardowns and cleanups
    TeardownRunning,
    /// Finished with no failure
    Done,
    /// Finished with at least one failure
    Failed,
    /// Finished after a skip signal, with no failure
    Skipped,
}

impl LeafState {
    /// Check if the state is one of the running states
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            LeafState::SetupRunning | LeafState::BodyRunning | LeafState::TeardownRunning
        )
    }

    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeafState::Done | LeafState::Failed | LeafState::Skipped)
    }

    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: LeafState) -> bool {
        use LeafState::*;
        match (self, next) {
            (Pending, SetupRunning) => true,
            (SetupRunning, BodyRunning) | (SetupRunning, TeardownRunning) => true,
            (BodyRunning, TeardownRunning) => true,
            (TeardownRunning, Done) | (TeardownRunning, Skipped) => true,
            (state, Failed) => state.is_running(),
            _ => false,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LeafState::Pending => "Pending",
            LeafState::SetupRunning => "SetupRunning",
            LeafState::BodyRunning => "BodyRunning",
            LeafState::TeardownRunning => "TeardownRunning",
            LeafState::Done => "Done",
            LeafState::Failed => "Failed",
            LeafState::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for LeafState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final status of a leaf, as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafStatus {
    /// Ran to completion with no failure
    Passed,
    /// At least one failure was recorded
    Failed,
    /// Skipped (by a hook, body, around or tag filter) with no failure
    Skipped,
}

impl LeafStatus {
    /// Map a terminal state to its status
    ///
    /// Returns `None` for non-terminal states.
    pub fn from_state(state: LeafState) -> Option<Self> {
        match state {
            LeafState::Done => Some(LeafStatus::Passed),
            LeafState::Failed => Some(LeafStatus::Failed),
            LeafState::Skipped => Some(LeafStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for LeafStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafStatus::Passed => write!(f, "passed"),
            LeafStatus::Failed => write!(f, "failed"),
            LeafStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Category of a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A hook or body failed or panicked
    Assertion,
    /// A teardown, deferred cleanup or variable cleanup failed
    Teardown,
    /// The specification itself is broken (undefined or circular variable, ...)
    Configuration,
}

/// One failure recorded against a leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// State the leaf was in when the failure happened
    pub phase: LeafState,
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
}

impl Failure {
    /// Create a failure record
    pub fn new(phase: LeafState, kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            phase,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Assertion => "failure",
            FailureKind::Teardown => "teardown failure",
            FailureKind::Configuration => "configuration error",
        };
        write!(f, "{} during {}: {}", kind, self.phase, self.message)
    }
}

/// Everything known about one finished leaf execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafReport {
    /// Full context path, segments joined with '/'
    pub path: String,
    /// Tags inherited from every ancestor
    pub tags: Vec<String>,
    /// Final status
    pub status: LeafStatus,
    /// All failures, in the order they were recorded
    pub failures: Vec<Failure>,
    /// Skip reason, if the leaf was skipped
    pub skip_reason: Option<String>,
    /// Lines logged through the leaf's case handle
    pub logs: Vec<String>,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl LeafReport {
    /// Check if the leaf passed
    pub fn passed(&self) -> bool {
        self.status == LeafStatus::Passed
    }

    /// Check if the leaf failed
    pub fn failed(&self) -> bool {
        self.status == LeafStatus::Failed
    }

    /// Check if the leaf was skipped
    pub fn skipped(&self) -> bool {
        self.status == LeafStatus::Skipped
    }

    /// Check if any configuration error was recorded
    pub fn has_configuration_error(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == FailureKind::Configuration)
    }
}
