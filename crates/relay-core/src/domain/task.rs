use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskId;

/// Characters that join several problem types into one composite tag.
pub const COMPOSITE_SEPARATORS: [char; 4] = ['+', ',', '|', '/'];

/// Caller-supplied tag the Router uses to pick a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemType(String);

impl ProblemType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `performance+security` のように複数の分類をまとめたタグか
    pub fn is_composite(&self) -> bool {
        self.0.contains(COMPOSITE_SEPARATORS)
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ProblemType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A unit of work as submitted by a caller.
///
/// Immutable once dispatched: the dispatcher only ever reads it, and
/// retries build their own description instead of editing this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    description: String,
    problem_type: ProblemType,
    created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        description: impl Into<String>,
        problem_type: ProblemType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            problem_type,
            created_at,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn problem_type(&self) -> &ProblemType {
        &self.problem_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_tags_are_detected() {
        assert!(ProblemType::new("performance+security").is_composite());
        assert!(ProblemType::new("a,b").is_composite());
        assert!(ProblemType::new("a|b").is_composite());
        assert!(ProblemType::new("a/b").is_composite());
        assert!(!ProblemType::new("performance").is_composite());
        assert!(!ProblemType::new("code-review").is_composite());
    }
}
