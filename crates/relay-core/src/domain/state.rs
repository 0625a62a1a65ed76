//! Per-task dispatch state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dispatch state of a single task.
///
/// State transitions:
/// - Routed -> Awaiting -> Validating -> Done
/// - Validating -> Retrying -> Awaiting (same handler, clarifying note)
/// - Validating -> Fallback -> Awaiting (next candidate handler)
/// - Validating -> Split -> Done | Failed (aggregated over sub-tasks)
/// - Validating -> Escalated -> Failed
/// - any non-terminal state -> Cancelled
///
/// Only one state is active per task at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Routed,
    Awaiting,
    Validating,
    Retrying,
    Fallback,
    Split,
    Escalated,
    Done,
    Failed,
    Cancelled,
}

impl DispatchState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::Done | DispatchState::Failed | DispatchState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Routed => "ROUTED",
            DispatchState::Awaiting => "AWAITING",
            DispatchState::Validating => "VALIDATING",
            DispatchState::Retrying => "RETRYING",
            DispatchState::Fallback => "FALLBACK",
            DispatchState::Split => "SPLIT",
            DispatchState::Escalated => "ESCALATED",
            DispatchState::Done => "DONE",
            DispatchState::Failed => "FAILED",
            DispatchState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
