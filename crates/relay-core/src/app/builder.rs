//! RelayBuilder - dispatcher の構築とワイヤリング
//!
//! スキーマ・ルート・handler の結線は起動時に一度だけ行い、
//! `build()` で検証してから凍結します（Fail-fast 設計）。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_MAX_SPLIT_DEPTH, Dispatcher};
use super::router::Router;
use super::validator::EnvelopeValidator;
use crate::domain::decision::{PolicyTable, RecoveryPolicy};
use crate::domain::errors::RegistryError;
use crate::domain::task::ProblemType;
use crate::ports::{Clock, Handler, IdGenerator, SystemClock, TaskSplitter, UlidGenerator};
use crate::schema::{HandlerSchema, SchemaRegistry};

/// RelayBuilder は Dispatcher を構築
///
/// # 使用例
/// ```ignore
/// let dispatcher = RelayBuilder::new()
///     .schema(HandlerSchema::new("code-analyzer").require("recommendations"))?
///     .handler(analyzer)?
///     .route("performance", ["performance-auditor", "code-analyzer"])?
///     .build()?;
/// ```
///
/// # build() 時の検証
/// - 空の候補リストを持つルートがない
/// - ルートが参照する handler は全てスキーマ登録済み
/// - ルートが参照する handler は全て invoker が結線済み
/// - 結線された invoker は全てスキーマ登録済み
pub struct RelayBuilder {
    registry: SchemaRegistry,
    router: Router,
    handlers: HashMap<String, Arc<dyn Handler>>,
    timeouts: HashMap<String, Duration>,
    default_timeout: Duration,
    policy: Arc<dyn RecoveryPolicy>,
    splitter: Option<Arc<dyn TaskSplitter>>,
    max_split_depth: usize,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

/// BuildError は構築時のエラー
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("handler '{0}' is bound twice")]
    DuplicateInvoker(String),

    #[error("problem type '{0}' is routed twice")]
    DuplicateRoute(String),

    #[error("problem types with no candidate handlers: {0:?}")]
    EmptyRoutes(Vec<String>),

    #[error("routes reference handlers without a schema: {0:?}")]
    UnknownRouteHandlers(Vec<String>),

    #[error("routed handlers with no invoker bound: {0:?}")]
    MissingInvokers(Vec<String>),

    #[error("invokers bound without a schema: {0:?}")]
    InvokersWithoutSchema(Vec<String>),
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self {
            registry: SchemaRegistry::new(),
            router: Router::new(),
            handlers: HashMap::new(),
            timeouts: HashMap::new(),
            default_timeout: DEFAULT_HANDLER_TIMEOUT,
            policy: Arc::new(PolicyTable::default()),
            splitter: None,
            max_split_depth: DEFAULT_MAX_SPLIT_DEPTH,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    /// Register the output schema of one handler.
    pub fn schema(mut self, schema: HandlerSchema) -> Result<Self, BuildError> {
        self.registry.register_schema(schema)?;
        Ok(self)
    }

    /// Bind an invoker under its own `name()`.
    pub fn handler(self, handler: impl Handler + 'static) -> Result<Self, BuildError> {
        self.bind(Arc::new(handler))
    }

    /// Like `handler`, for invokers the caller keeps a handle on.
    pub fn bind(mut self, handler: Arc<dyn Handler>) -> Result<Self, BuildError> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(BuildError::DuplicateInvoker(name));
        }
        self.handlers.insert(name, handler);
        Ok(self)
    }

    /// Candidates in priority order: primary first, then fallbacks.
    pub fn route<I, S>(
        mut self,
        problem_type: impl Into<ProblemType>,
        candidates: I,
    ) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let problem_type = problem_type.into();
        let candidates: Vec<String> = candidates.into_iter().map(Into::into).collect();
        if self.router.contains(&problem_type) {
            return Err(BuildError::DuplicateRoute(problem_type.to_string()));
        }
        self.router.insert(problem_type, candidates);
        Ok(self)
    }

    pub fn handler_timeout(mut self, handler_name: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(handler_name.into(), timeout);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn policy(mut self, policy: impl RecoveryPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn splitter(mut self, splitter: impl TaskSplitter + 'static) -> Self {
        self.splitter = Some(Arc::new(splitter));
        self
    }

    pub fn max_split_depth(mut self, depth: usize) -> Self {
        self.max_split_depth = depth;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// 検証してから Dispatcher を生成
    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let empty: Vec<String> = self
            .router
            .problem_types()
            .filter(|pt| self.router.candidates(pt).is_err())
            .map(ToString::to_string)
            .collect();
        if !empty.is_empty() {
            return Err(BuildError::EmptyRoutes(empty));
        }

        let routed: BTreeSet<&str> = self.router.referenced_handlers().collect();

        let unknown: Vec<String> = routed
            .iter()
            .filter(|h| !self.registry.contains(h))
            .map(|h| h.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(BuildError::UnknownRouteHandlers(unknown));
        }

        let missing: Vec<String> = routed
            .iter()
            .filter(|h| !self.handlers.contains_key(**h))
            .map(|h| h.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingInvokers(missing));
        }

        let mut orphans: Vec<String> = self
            .handlers
            .keys()
            .filter(|h| !self.registry.contains(h))
            .cloned()
            .collect();
        if !orphans.is_empty() {
            orphans.sort();
            return Err(BuildError::InvokersWithoutSchema(orphans));
        }

        Ok(Dispatcher {
            validator: EnvelopeValidator::new(Arc::new(self.registry)),
            router: Arc::new(self.router),
            handlers: self.handlers,
            timeouts: self.timeouts,
            default_timeout: self.default_timeout,
            policy: self.policy,
            splitter: self.splitter,
            max_split_depth: self.max_split_depth,
            clock: self.clock,
            ids: self.ids,
        })
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
