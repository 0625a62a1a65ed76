//! Errors - エラー型と分類
//!
//! `ErrorKind` はフラットな分類で、RecoveryAttempt に記録されたり
//! RecoveryPolicy の判断材料になったりします。各エラー enum は
//! `kind()` で自分の分類を返します。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;

/// ErrorKind は失敗の分類
///
/// - データ形状エラー（MalformedEnvelope 〜 ConstraintViolation）: ladder で回復
/// - 構成エラー（NoHandler, AmbiguousProblemType, HandlersExhausted）: 即座に呼び出し元へ
/// - Timeout: handler が期限内に応答しなかった
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedEnvelope,
    HandlerMismatch,
    InvalidStatus,
    HandlerReportedFailure,
    UnknownHandler,
    MissingField,
    ConstraintViolation,
    NoHandler,
    AmbiguousProblemType,
    HandlersExhausted,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedEnvelope => "malformed_envelope",
            ErrorKind::HandlerMismatch => "handler_mismatch",
            ErrorKind::InvalidStatus => "invalid_status",
            ErrorKind::HandlerReportedFailure => "handler_reported_failure",
            ErrorKind::UnknownHandler => "unknown_handler",
            ErrorKind::MissingField => "missing_field",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::NoHandler => "no_handler",
            ErrorKind::AmbiguousProblemType => "ambiguous_problem_type",
            ErrorKind::HandlersExhausted => "handlers_exhausted",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// Configuration-class errors are surfaced immediately; retrying cannot fix them.
    pub fn is_configuration(self) -> bool {
        matches!(
            self,
            ErrorKind::NoHandler | ErrorKind::AmbiguousProblemType | ErrorKind::HandlersExhausted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope validation failures, in the order the validator checks for them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("handler mismatch: expected '{expected}', envelope names '{actual}'")]
    HandlerMismatch { expected: String, actual: String },

    #[error("invalid execution_status '{0}'")]
    InvalidStatus(String),

    #[error("handler reported execution_status '{status}'")]
    HandlerReportedFailure { status: String },

    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingField(Vec<String>),

    #[error("constraint violated on field '{field}' ({constraint}): {value}")]
    ConstraintViolation {
        field: String,
        constraint: String,
        value: serde_json::Value,
    },
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            ValidationError::HandlerMismatch { .. } => ErrorKind::HandlerMismatch,
            ValidationError::InvalidStatus(_) => ErrorKind::InvalidStatus,
            ValidationError::HandlerReportedFailure { .. } => ErrorKind::HandlerReportedFailure,
            ValidationError::UnknownHandler(_) => ErrorKind::UnknownHandler,
            ValidationError::MissingField(_) => ErrorKind::MissingField,
            ValidationError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
        }
    }
}

/// SchemaRegistry の操作エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("unknown handler '{0}'")]
    UnknownHandler(String),
}

/// Router の解決エラー（すべて構成エラー）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no handler registered for problem type '{0}'")]
    NoHandler(String),

    #[error("problem type '{0}' is an unregistered composite; resolve the ambiguity before dispatch")]
    AmbiguousProblemType(String),

    #[error("every candidate handler for problem type '{0}' has been exhausted")]
    HandlersExhausted(String),
}

impl RouteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouteError::NoHandler(_) => ErrorKind::NoHandler,
            RouteError::AmbiguousProblemType(_) => ErrorKind::AmbiguousProblemType,
            RouteError::HandlersExhausted(_) => ErrorKind::HandlersExhausted,
        }
    }
}

/// Errors a handler can raise while being invoked (transport, process, decode).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler '{handler}' failed to start: {source}")]
    Spawn {
        handler: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handler '{handler}' exited with {status}: {stderr}")]
    Exit {
        handler: String,
        status: String,
        stderr: String,
    },

    #[error("handler '{handler}' has no more scripted responses")]
    Exhausted { handler: String },

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by `dispatch` / `submit` without entering the recovery ladder.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("no invoker bound for handler '{0}'")]
    HandlerNotBound(String),
}

impl DispatchError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DispatchError::Route(e) => Some(e.kind()),
            DispatchError::HandlerNotBound(_) => None,
        }
    }
}

/// Errors of `DispatchService::await_result`.
#[derive(Debug, Error)]
pub enum AwaitError {
    #[error("unknown task {0} (never submitted or already consumed)")]
    UnknownTask(TaskId),

    #[error("task {0} did not resolve within the await timeout")]
    Timeout(TaskId),

    #[error("dispatch of task {task_id} aborted: {message}")]
    Aborted { task_id: TaskId, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_as_snake_case() {
        let s = serde_json::to_string(&ErrorKind::HandlerReportedFailure).unwrap();
        assert_eq!(s, "\"handler_reported_failure\"");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn missing_field_message_lists_every_field() {
        let err = ValidationError::MissingField(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "missing required fields: a, b");
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }

    #[test]
    fn route_errors_are_configuration_class() {
        for err in [
            RouteError::NoHandler("x".into()),
            RouteError::AmbiguousProblemType("x+y".into()),
            RouteError::HandlersExhausted("x".into()),
        ] {
            assert!(err.kind().is_configuration());
        }
        assert!(!ErrorKind::MissingField.is_configuration());
    }
}
