//! RelayConfig - TOML で書く宣言的な構成
//!
//! スキーマ・ルート・タイムアウト・ポリシーを 1 ファイルにまとめます。
//! invoker（Handler 実装）はコードで結線するので、ここでは扱いません。
//! `command` は CLI が CommandHandler を作るためだけに使います。

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::app::builder::{BuildError, RelayBuilder};
use crate::app::dispatcher::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_MAX_SPLIT_DEPTH};
use crate::app::router::Router;
use crate::domain::attempt::MAX_RECOVERY_ATTEMPTS;
use crate::domain::decision::PolicyTable;
use crate::domain::task::ProblemType;
use crate::schema::{Constraint, HandlerSchema, SchemaRegistry};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("handler '{0}' is declared twice")]
    DuplicateHandler(String),

    #[error("route '{problem_type}' references undeclared handler '{handler}'")]
    UnknownRouteHandler {
        problem_type: String,
        handler: String,
    },

    #[error("route '{0}' has no candidates")]
    EmptyRoute(String),

    #[error("policy.max_attempts must be within 1..={max}, got {got}")]
    MaxAttemptsOutOfRange { got: usize, max: usize },

    #[error(transparent)]
    Build(#[from] BuildError),
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub handlers: Vec<HandlerSection>,
    #[serde(default)]
    pub routes: Vec<RouteSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_split_depth: default_max_split_depth(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HANDLER_TIMEOUT.as_secs()
}

fn default_max_split_depth() -> usize {
    DEFAULT_MAX_SPLIT_DEPTH
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_one")]
    pub retries_per_handler: usize,
    #[serde(default = "default_one")]
    pub max_fallbacks: usize,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retries_per_handler: 1,
            max_fallbacks: 1,
        }
    }
}

fn default_max_attempts() -> usize {
    MAX_RECOVERY_ATTEMPTS
}

fn default_one() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerSection {
    pub name: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, Constraint>,
    pub timeout_secs: Option<u64>,
    /// `[program, args...]`
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSection {
    pub problem_type: String,
    pub candidates: Vec<String>,
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Static checks that need no invokers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RECOVERY_ATTEMPTS).contains(&self.policy.max_attempts) {
            return Err(ConfigError::MaxAttemptsOutOfRange {
                got: self.policy.max_attempts,
                max: MAX_RECOVERY_ATTEMPTS,
            });
        }

        let mut declared = HashSet::new();
        for h in &self.handlers {
            if !declared.insert(h.name.as_str()) {
                return Err(ConfigError::DuplicateHandler(h.name.clone()));
            }
        }

        for route in &self.routes {
            if route.candidates.is_empty() {
                return Err(ConfigError::EmptyRoute(route.problem_type.clone()));
            }
            if let Some(unknown) = route
                .candidates
                .iter()
                .find(|c| !declared.contains(c.as_str()))
            {
                return Err(ConfigError::UnknownRouteHandler {
                    problem_type: route.problem_type.clone(),
                    handler: unknown.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::new(
            self.policy.max_attempts,
            self.policy.retries_per_handler,
            self.policy.max_fallbacks,
        )
    }

    pub fn handler(&self, name: &str) -> Option<&HandlerSection> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// One schema per declared handler.
    pub fn schemas(&self) -> Vec<HandlerSchema> {
        self.handlers
            .iter()
            .map(|h| {
                let schema = h
                    .required_fields
                    .iter()
                    .fold(HandlerSchema::new(&h.name), |s, f| s.require(f));
                h.constraints
                    .iter()
                    .fold(schema, |s, (f, c)| s.constrain(f, c.clone()))
            })
            .collect()
    }

    pub fn schema_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        let mut registry = SchemaRegistry::new();
        for schema in self.schemas() {
            registry
                .register_schema(schema)
                .map_err(BuildError::from)?;
        }
        Ok(registry)
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new();
        for route in &self.routes {
            router.insert(
                ProblemType::new(&route.problem_type),
                route.candidates.clone(),
            );
        }
        router
    }

    /// A builder carrying every schema, route, timeout and the policy.
    ///
    /// Invokers still have to be bound before `build()`.
    pub fn builder(&self) -> Result<RelayBuilder, ConfigError> {
        self.validate()?;

        let mut builder = RelayBuilder::new()
            .default_timeout(Duration::from_secs(self.dispatch.default_timeout_secs))
            .max_split_depth(self.dispatch.max_split_depth)
            .policy(self.policy_table());

        for schema in self.schemas() {
            builder = builder.schema(schema)?;
        }
        for h in &self.handlers {
            if let Some(secs) = h.timeout_secs {
                builder = builder.handler_timeout(&h.name, Duration::from_secs(secs));
            }
        }

        for route in &self.routes {
            builder = builder.route(
                ProblemType::new(&route.problem_type),
                route.candidates.iter().cloned(),
            )?;
        }
        Ok(builder)
    }
}
