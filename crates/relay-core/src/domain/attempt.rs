//! Recovery attempts: the per-task history of what failed and what was done about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::decision::Strategy;
use super::errors::ErrorKind;
use super::ids::TaskId;

/// Hard ceiling on recovery attempts per task.
pub const MAX_RECOVERY_ATTEMPTS: usize = 4;

/// What actually happened after the policy picked a strategy.
///
/// This can differ from the strategy: a `split` with no splitter configured
/// ends up `Escalated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Same handler re-invoked with a clarifying note.
    Retried { handler: String },

    /// Moved on to the next candidate handler.
    FellBack { from: String, to: String },

    /// Description partitioned into sub-tasks.
    Split { parts: usize },

    /// No further automated action.
    Escalated { reason: String },
}

impl AttemptOutcome {
    pub fn is_escalation(&self) -> bool {
        matches!(self, AttemptOutcome::Escalated { .. })
    }
}

/// One failed handler invocation and the recovery decision taken for it.
///
/// Records:
/// - which handler failed and why (`error` + `detail`)
/// - what the policy asked for (`strategy`)
/// - what the dispatcher did (`outcome`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub task_id: TaskId,

    /// 1-based.
    pub attempt_number: u32,

    pub handler_name: String,
    pub error: ErrorKind,
    pub detail: String,
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("recovery history for {task_id} is full ({cap} attempts)")]
pub struct HistoryFull {
    pub task_id: TaskId,
    pub cap: usize,
}

/// Bounded, ordered attempt history for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptHistory {
    task_id: TaskId,
    cap: usize,
    attempts: Vec<RecoveryAttempt>,
}

impl AttemptHistory {
    /// `cap` is clamped to `1..=MAX_RECOVERY_ATTEMPTS`.
    pub fn new(task_id: TaskId, cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_RECOVERY_ATTEMPTS);
        Self {
            task_id,
            cap,
            attempts: Vec::with_capacity(cap),
        }
    }

    pub fn push(&mut self, attempt: RecoveryAttempt) -> Result<(), HistoryFull> {
        if self.is_full() {
            return Err(HistoryFull {
                task_id: self.task_id,
                cap: self.cap,
            });
        }
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// attempt_number for the next record.
    pub fn next_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn is_full(&self) -> bool {
        self.attempts.len() >= self.cap
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn as_slice(&self) -> &[RecoveryAttempt] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&RecoveryAttempt> {
        self.attempts.last()
    }

    pub fn into_vec(self) -> Vec<RecoveryAttempt> {
        self.attempts
    }
}
