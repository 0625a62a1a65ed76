//! Recovery decisions: what to do after a failed handler attempt.
//!
//! This module defines the Strategy type (what to do next) and the
//! RecoveryPolicy trait (how to pick it from the attempt history). The
//! dispatcher executes the strategy; the policy never touches state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::attempt::{MAX_RECOVERY_ATTEMPTS, RecoveryAttempt};
use super::errors::ErrorKind;

/// The recovery ladder, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Re-invoke the same handler with a clarifying note.
    Retry,

    /// Move to the next candidate handler with the original description.
    Fallback,

    /// Partition the description into independently dispatchable sub-tasks.
    Split,

    /// Stop and report the task as failed.
    Escalate,
}

/// Which way an error kind pushes the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    /// Likely a scope/description problem: ask the same handler again.
    Retry,

    /// Likely a handler-capability problem: try someone else.
    Fallback,
}

/// Trait for deciding the next recovery step.
///
/// Policies are pure functions of the history: given the attempts recorded
/// so far and the failure just observed, they return the next strategy
/// without side effects.
pub trait RecoveryPolicy: Send + Sync {
    /// # Arguments
    /// * `history` - attempts already recorded for the task, oldest first
    /// * `latest` - kind of the failure that has not been recorded yet
    fn next_action(&self, history: &[RecoveryAttempt], latest: ErrorKind) -> Strategy;

    /// Number of failures after which the policy always escalates.
    fn max_attempts(&self) -> usize;
}

/// Table-driven default policy.
///
/// - failures >= max_attempts → escalate
/// - retry-biased kind and retries left on the current handler → retry
/// - fallbacks left → fallback
/// - otherwise → split
///
/// With the defaults, a handler that keeps dropping required fields sees
/// retry, fallback, retry, escalate.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    max_attempts: usize,
    retries_per_handler: usize,
    max_fallbacks: usize,
    biases: HashMap<ErrorKind, Bias>,
}

impl PolicyTable {
    pub fn new(max_attempts: usize, retries_per_handler: usize, max_fallbacks: usize) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_RECOVERY_ATTEMPTS),
            retries_per_handler,
            max_fallbacks,
            biases: default_biases(),
        }
    }

    /// Override the bias of one error kind.
    pub fn with_bias(mut self, kind: ErrorKind, bias: Bias) -> Self {
        self.biases.insert(kind, bias);
        self
    }

    /// Kinds without an entry are treated as capability problems.
    pub fn bias(&self, kind: ErrorKind) -> Bias {
        self.biases.get(&kind).copied().unwrap_or(Bias::Fallback)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(MAX_RECOVERY_ATTEMPTS, 1, 1)
    }
}

fn default_biases() -> HashMap<ErrorKind, Bias> {
    HashMap::from([
        (ErrorKind::MissingField, Bias::Retry),
        (ErrorKind::ConstraintViolation, Bias::Retry),
        (ErrorKind::MalformedEnvelope, Bias::Retry),
        (ErrorKind::HandlerMismatch, Bias::Retry),
        (ErrorKind::InvalidStatus, Bias::Retry),
        (ErrorKind::HandlerReportedFailure, Bias::Fallback),
        (ErrorKind::Timeout, Bias::Fallback),
        (ErrorKind::UnknownHandler, Bias::Fallback),
    ])
}

impl RecoveryPolicy for PolicyTable {
    fn next_action(&self, history: &[RecoveryAttempt], latest: ErrorKind) -> Strategy {
        let failures = history.len() + 1;
        if failures >= self.max_attempts {
            return Strategy::Escalate;
        }

        let fallbacks_taken = history
            .iter()
            .filter(|a| a.strategy == Strategy::Fallback)
            .count();
        // retries against the handler currently in use
        let retries_on_handler = history
            .iter()
            .rev()
            .take_while(|a| a.strategy != Strategy::Fallback)
            .filter(|a| a.strategy == Strategy::Retry)
            .count();

        match self.bias(latest) {
            Bias::Retry if retries_on_handler < self.retries_per_handler => Strategy::Retry,
            _ if fallbacks_taken < self.max_fallbacks => Strategy::Fallback,
            _ => Strategy::Split,
        }
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}
