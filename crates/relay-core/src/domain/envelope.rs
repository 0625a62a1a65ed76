//! Envelope - handler が返す構造化レスポンス
//!
//! Wire shape:
//! ```json
//! {
//!   "handler_name": "code-analyzer",
//!   "timestamp": "2024-01-01T00:00:00Z",
//!   "execution_status": "completed",
//!   "output": { "...": "handler-specific fields" }
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const KEY_HANDLER_NAME: &str = "handler_name";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_EXECUTION_STATUS: &str = "execution_status";
pub const KEY_OUTPUT: &str = "output";

/// Top-level keys every envelope must carry.
pub const ENVELOPE_KEYS: [&str; 4] = [
    KEY_HANDLER_NAME,
    KEY_TIMESTAMP,
    KEY_EXECUTION_STATUS,
    KEY_OUTPUT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    InProgress,
    Blocked,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Blocked => "blocked",
            ExecutionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ExecutionStatus::Completed),
            "in_progress" => Ok(ExecutionStatus::InProgress),
            "blocked" => Ok(ExecutionStatus::Blocked),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(other.to_string()),
        }
    }
}

/// A parsed envelope.
///
/// Only the validator builds these from raw JSON, so holding one means the
/// top-level shape was already checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub handler_name: String,
    /// Offset as the handler sent it.
    pub timestamp: DateTime<FixedOffset>,
    pub execution_status: ExecutionStatus,
    pub output: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Convenience for handlers that build their answer in code.
    pub fn completed(
        handler_name: impl Into<String>,
        timestamp: impl Into<DateTime<FixedOffset>>,
        output: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            handler_name: handler_name.into(),
            timestamp: timestamp.into(),
            execution_status: ExecutionStatus::Completed,
            output,
        }
    }

    /// Back to the wire shape.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "handler_name": self.handler_name,
            "timestamp": self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            "execution_status": self.execution_status.as_str(),
            "output": self.output,
        })
    }
}
