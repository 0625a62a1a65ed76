//! Router - problem_type から handler_name へのマッピング
//!
//! problem_type ごとに候補 handler の順序付きリストを持ちます（先頭が primary、
//! 残りが優先度順の fallback）。分類が曖昧なタスクを推測で振り分けることはしません。

use std::collections::{BTreeMap, HashSet};

use crate::domain::errors::RouteError;
use crate::domain::task::ProblemType;

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: BTreeMap<ProblemType, Vec<String>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Set the candidates of a problem type, returning the previous list if any.
    pub fn insert(
        &mut self,
        problem_type: ProblemType,
        candidates: Vec<String>,
    ) -> Option<Vec<String>> {
        self.routes.insert(problem_type, candidates)
    }

    /// Ordered candidates, primary first.
    pub fn candidates(&self, problem_type: &ProblemType) -> Result<&[String], RouteError> {
        match self.routes.get(problem_type) {
            Some(candidates) if !candidates.is_empty() => Ok(candidates),
            Some(_) => Err(RouteError::NoHandler(problem_type.to_string())),
            None if problem_type.is_composite() => {
                Err(RouteError::AmbiguousProblemType(problem_type.to_string()))
            }
            None => Err(RouteError::NoHandler(problem_type.to_string())),
        }
    }

    /// The primary handler.
    pub fn route(&self, problem_type: &ProblemType) -> Result<&str, RouteError> {
        self.candidates(problem_type)
            .map(|candidates| candidates[0].as_str())
    }

    /// First candidate not in `exhausted`.
    pub fn next_fallback(
        &self,
        problem_type: &ProblemType,
        exhausted: &HashSet<String>,
    ) -> Result<&str, RouteError> {
        self.candidates(problem_type)?
            .iter()
            .find(|c| !exhausted.contains(c.as_str()))
            .map(String::as_str)
            .ok_or_else(|| RouteError::HandlersExhausted(problem_type.to_string()))
    }

    pub fn contains(&self, problem_type: &ProblemType) -> bool {
        self.routes.contains_key(problem_type)
    }

    pub fn problem_types(&self) -> impl Iterator<Item = &ProblemType> {
        self.routes.keys()
    }

    /// Every handler name referenced by any route.
    pub fn referenced_handlers(&self) -> impl Iterator<Item = &str> {
        self.routes.values().flatten().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
