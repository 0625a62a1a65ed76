//! Outcome model: what a dispatch resolves to.
//!
//! Every dispatch ends in exactly one of these shapes. Failed and cancelled
//! outcomes always carry the ordered attempt history so the caller can see
//! what was tried.

use serde::{Deserialize, Serialize};

use super::attempt::RecoveryAttempt;
use super::envelope::Envelope;
use super::errors::ErrorKind;
use super::ids::TaskId;
use super::state::DispatchState;

/// A validated envelope tagged with the task it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub envelope: Envelope,

    /// Failures recovered from before this envelope was accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<RecoveryAttempt>,
}

impl TaskResult {
    pub fn handler_name(&self) -> &str {
        &self.envelope.handler_name
    }
}

/// A task that was split and whose sub-tasks all completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub task_id: TaskId,
    pub history: Vec<RecoveryAttempt>,
    pub children: Vec<DispatchOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Escalated task: no further automated action will be taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task_id: TaskId,
    pub history: Vec<RecoveryAttempt>,
    pub last_error: LastError,

    /// Sub-task outcomes when the failure happened after a split.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DispatchOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReport {
    pub task_id: TaskId,

    /// State the task was in when the cancellation was observed.
    pub cancelled_in: DispatchState,
    pub history: Vec<RecoveryAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Done(TaskResult),
    Aggregated(AggregateResult),
    Failed(FailureReport),
    Cancelled(CancelReport),
}

impl DispatchOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            DispatchOutcome::Done(r) => r.task_id,
            DispatchOutcome::Aggregated(r) => r.task_id,
            DispatchOutcome::Failed(r) => r.task_id,
            DispatchOutcome::Cancelled(r) => r.task_id,
        }
    }

    /// Terminal state of the task.
    pub fn state(&self) -> DispatchState {
        match self {
            DispatchOutcome::Done(_) | DispatchOutcome::Aggregated(_) => DispatchState::Done,
            DispatchOutcome::Failed(_) => DispatchState::Failed,
            DispatchOutcome::Cancelled(_) => DispatchState::Cancelled,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == DispatchState::Done
    }

    pub fn history(&self) -> &[RecoveryAttempt] {
        match self {
            DispatchOutcome::Done(r) => &r.history,
            DispatchOutcome::Aggregated(r) => &r.history,
            DispatchOutcome::Failed(r) => &r.history,
            DispatchOutcome::Cancelled(r) => &r.history,
        }
    }

    pub fn as_result(&self) -> Option<&TaskResult> {
        match self {
            DispatchOutcome::Done(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_failure(&self) -> Option<&FailureReport> {
        match self {
            DispatchOutcome::Failed(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    #[test]
    fn outcome_is_tagged_by_status() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let done = DispatchOutcome::Done(TaskResult {
            task_id,
            envelope: Envelope::completed("h", ts, serde_json::Map::new()),
            history: vec![],
        });

        let v = serde_json::to_value(&done).unwrap();
        assert_eq!(v["status"], "done");
        assert_eq!(v["envelope"]["handler_name"], "h");
        assert!(v.get("history").is_none());
        assert_eq!(done.state(), DispatchState::Done);

        let failed = DispatchOutcome::Failed(FailureReport {
            task_id,
            history: vec![],
            last_error: LastError {
                kind: ErrorKind::Timeout,
                message: "deadline elapsed".into(),
            },
            children: vec![],
        });
        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["last_error"]["kind"], "timeout");
        assert!(!failed.is_done());
    }
}
