//! Dispatcher - タスクを handler に送り、検証し、失敗時は recovery ladder を回す
//!
//! 1 タスクの状態機械は単一の async ループで、同時に動く状態は常に 1 つです。
//! 独立したタスク同士は読み取り専用の設定（Arc）しか共有しません。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::router::Router;
use super::validator::EnvelopeValidator;
use crate::domain::attempt::{AttemptHistory, AttemptOutcome, RecoveryAttempt};
use crate::domain::decision::{RecoveryPolicy, Strategy};
use crate::domain::errors::{DispatchError, ErrorKind};
use crate::domain::ids::TaskId;
use crate::domain::outcome::{
    AggregateResult, CancelReport, DispatchOutcome, FailureReport, LastError, TaskResult,
};
use crate::domain::state::DispatchState;
use crate::domain::task::{ProblemType, Task};
use crate::ports::{Clock, Handler, IdGenerator, TaskSplitter};

/// Per-handler wait when nothing else is configured.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Sub-tasks produced by a split may not split again.
pub const DEFAULT_MAX_SPLIT_DEPTH: usize = 1;

/// A failed attempt before it is recorded.
#[derive(Debug, Clone)]
struct Failure {
    kind: ErrorKind,
    detail: String,
}

/// Dispatcher owns the frozen configuration: registry (via the validator),
/// router, handler bindings and recovery policy.
///
/// Built by `RelayBuilder`; cheap to share behind `Arc`.
pub struct Dispatcher {
    pub(crate) validator: EnvelopeValidator,
    pub(crate) router: Arc<Router>,
    pub(crate) handlers: HashMap<String, Arc<dyn Handler>>,
    pub(crate) timeouts: HashMap<String, Duration>,
    pub(crate) default_timeout: Duration,
    pub(crate) policy: Arc<dyn RecoveryPolicy>,
    pub(crate) splitter: Option<Arc<dyn TaskSplitter>>,
    pub(crate) max_split_depth: usize,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
}

impl Dispatcher {
    pub fn validator(&self) -> &EnvelopeValidator {
        &self.validator
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Create a task stamped with a fresh id and the dispatcher's clock.
    pub fn new_task(&self, description: impl Into<String>, problem_type: ProblemType) -> Task {
        Task::new(
            self.ids.generate_task_id(),
            description,
            problem_type,
            self.clock.now(),
        )
    }

    pub fn timeout_for(&self, handler_name: &str) -> Duration {
        self.timeouts
            .get(handler_name)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Dispatch a task and wait until it reaches a terminal state.
    ///
    /// Configuration-class problems (no route, ambiguous tag, unbound
    /// handler) come back as `Err`; everything else resolves to an outcome.
    pub async fn dispatch(&self, task: Task) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch_with_cancel(task, CancellationToken::new())
            .await
    }

    /// Like `dispatch`, resolving to `Cancelled` once `cancel` fires.
    pub async fn dispatch_with_cancel(
        &self,
        task: Task,
        cancel: CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.run(task, cancel, 0).await
    }

    fn run(
        &self,
        task: Task,
        cancel: CancellationToken,
        depth: usize,
    ) -> BoxFuture<'_, Result<DispatchOutcome, DispatchError>> {
        let span = info_span!("dispatch", task_id = %task.id(), depth);
        Box::pin(self.run_inner(task, cancel, depth).instrument(span))
    }

    async fn run_inner(
        &self,
        task: Task,
        cancel: CancellationToken,
        depth: usize,
    ) -> Result<DispatchOutcome, DispatchError> {
        let task_id = task.id();
        let problem_type = task.problem_type();

        // ROUTED
        let mut handler_name = self.router.route(problem_type)?.to_string();
        info!(problem_type = %problem_type, handler = %handler_name, "task routed");

        let mut history = AttemptHistory::new(task_id, self.policy.max_attempts());
        let mut exhausted: HashSet<String> = HashSet::new();
        let mut description = task.description().to_string();

        loop {
            // AWAITING
            let handler = self
                .handlers
                .get(&handler_name)
                .cloned()
                .ok_or_else(|| DispatchError::HandlerNotBound(handler_name.clone()))?;
            let deadline = self.timeout_for(&handler_name);
            debug!(handler = %handler_name, ?deadline, attempt = history.next_number(), "invoking handler");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(state = %DispatchState::Awaiting, "task cancelled");
                    return Ok(cancelled(task_id, DispatchState::Awaiting, history));
                }
                r = tokio::time::timeout(deadline, handler.invoke(&description, deadline)) => r,
            };

            // VALIDATING
            let failure = match response {
                Err(_elapsed) => Failure {
                    kind: ErrorKind::Timeout,
                    detail: format!("handler '{handler_name}' gave no response within {deadline:?}"),
                },
                Ok(Err(e)) => Failure {
                    kind: ErrorKind::HandlerReportedFailure,
                    detail: e.to_string(),
                },
                Ok(Ok(raw)) => match self.validator.validate(&raw, &handler_name) {
                    Ok(envelope) => {
                        info!(handler = %handler_name, attempts = history.len() + 1, "task done");
                        return Ok(DispatchOutcome::Done(TaskResult {
                            task_id,
                            envelope,
                            history: history.into_vec(),
                        }));
                    }
                    Err(e) => Failure {
                        kind: e.kind(),
                        detail: e.to_string(),
                    },
                },
            };
            warn!(
                handler = %handler_name,
                attempt = history.next_number(),
                error_kind = %failure.kind,
                detail = %failure.detail,
                "attempt failed"
            );

            // the history cap wins over whatever the policy says
            let strategy = if history.next_number() as usize >= history.cap() {
                Strategy::Escalate
            } else {
                self.policy.next_action(history.as_slice(), failure.kind)
            };

            match strategy {
                Strategy::Retry => {
                    // RETRYING
                    let fields = self
                        .validator
                        .registry()
                        .lookup(&handler_name)
                        .map(|s| s.required_fields_list())
                        .unwrap_or_default();
                    description = clarify(task.description(), &fields);
                    let outcome = AttemptOutcome::Retried {
                        handler: handler_name.clone(),
                    };
                    self.record(&mut history, &handler_name, &failure, strategy, outcome);
                    info!(state = %DispatchState::Retrying, handler = %handler_name, "retrying with clarifying note");
                }
                Strategy::Fallback => {
                    // FALLBACK
                    exhausted.insert(handler_name.clone());
                    match self.router.next_fallback(problem_type, &exhausted) {
                        Ok(next) => {
                            let next = next.to_string();
                            let outcome = AttemptOutcome::FellBack {
                                from: handler_name.clone(),
                                to: next.clone(),
                            };
                            self.record(&mut history, &handler_name, &failure, strategy, outcome);
                            info!(state = %DispatchState::Fallback, from = %handler_name, to = %next, "falling back");
                            handler_name = next;
                            description = task.description().to_string();
                        }
                        Err(route_err) => {
                            let outcome = AttemptOutcome::Escalated {
                                reason: route_err.to_string(),
                            };
                            self.record(&mut history, &handler_name, &failure, strategy, outcome);
                            warn!(state = %DispatchState::Escalated, error_kind = %route_err.kind(), "no fallback left");
                            return Ok(failed(
                                task_id,
                                history,
                                LastError {
                                    kind: route_err.kind(),
                                    message: route_err.to_string(),
                                },
                                Vec::new(),
                            ));
                        }
                    }
                }
                Strategy::Split => {
                    // SPLIT
                    let parts = match (&self.splitter, depth < self.max_split_depth) {
                        (Some(splitter), true) => split_parts(&**splitter, task.description()),
                        _ => Vec::new(),
                    };
                    if parts.len() < 2 {
                        let reason = match (&self.splitter, depth < self.max_split_depth) {
                            (None, _) => "no splitter configured".to_string(),
                            (_, false) => format!("split depth limit {} reached", self.max_split_depth),
                            _ => "description does not split into independent parts".to_string(),
                        };
                        let outcome = AttemptOutcome::Escalated { reason };
                        self.record(&mut history, &handler_name, &failure, strategy, outcome);
                        warn!(state = %DispatchState::Escalated, "split unavailable, escalating");
                        return Ok(failed(task_id, history, last_error(&failure), Vec::new()));
                    }

                    let outcome = AttemptOutcome::Split { parts: parts.len() };
                    self.record(&mut history, &handler_name, &failure, strategy, outcome);
                    info!(state = %DispatchState::Split, parts = parts.len(), "splitting task");
                    return self
                        .dispatch_children(task_id, problem_type, parts, history, &cancel, depth)
                        .await;
                }
                Strategy::Escalate => {
                    // ESCALATED
                    let outcome = AttemptOutcome::Escalated {
                        reason: format!("gave up after {} attempts", history.next_number()),
                    };
                    self.record(&mut history, &handler_name, &failure, strategy, outcome);
                    warn!(state = %DispatchState::Escalated, attempts = history.len(), "task escalated");
                    return Ok(failed(task_id, history, last_error(&failure), Vec::new()));
                }
            }
        }
    }

    /// Dispatch every part concurrently and aggregate once all are terminal.
    async fn dispatch_children(
        &self,
        task_id: TaskId,
        problem_type: &ProblemType,
        parts: Vec<String>,
        history: AttemptHistory,
        cancel: &CancellationToken,
        depth: usize,
    ) -> Result<DispatchOutcome, DispatchError> {
        let children = parts
            .into_iter()
            .map(|part| self.new_task(part, problem_type.clone()))
            .map(|child| self.run(child, cancel.child_token(), depth + 1));
        let children = join_all(children)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        if children.iter().all(DispatchOutcome::is_done) {
            info!(children = children.len(), "all sub-tasks done");
            return Ok(DispatchOutcome::Aggregated(AggregateResult {
                task_id,
                history: history.into_vec(),
                children,
            }));
        }

        if cancel.is_cancelled() {
            info!(state = %DispatchState::Split, "task cancelled");
            return Ok(cancelled(task_id, DispatchState::Split, history));
        }

        let not_done: Vec<&DispatchOutcome> = children.iter().filter(|c| !c.is_done()).collect();
        let kind = not_done
            .iter()
            .find_map(|c| c.as_failure().map(|f| f.last_error.kind))
            .unwrap_or(ErrorKind::HandlerReportedFailure);
        let message = format!("{} of {} sub-tasks failed", not_done.len(), children.len());
        warn!(%message, "split task failed");
        Ok(failed(task_id, history, LastError { kind, message }, children))
    }

    fn record(
        &self,
        history: &mut AttemptHistory,
        handler_name: &str,
        failure: &Failure,
        strategy: Strategy,
        outcome: AttemptOutcome,
    ) {
        let attempt = RecoveryAttempt {
            task_id: history.task_id(),
            attempt_number: history.next_number(),
            handler_name: handler_name.to_string(),
            error: failure.kind,
            detail: failure.detail.clone(),
            strategy,
            outcome,
            recorded_at: self.clock.now(),
        };
        if let Err(e) = history.push(attempt) {
            warn!(error = %e, "recovery attempt dropped");
        }
    }
}

/// Description for a retry: the original plus a note narrowing the scope.
pub fn clarify(original: &str, required_fields: &str) -> String {
    format!(
        "{original}\n\nscope was ambiguous: {original}, please produce strictly the fields {required_fields}"
    )
}

fn split_parts(splitter: &dyn TaskSplitter, description: &str) -> Vec<String> {
    splitter
        .split(description)
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn last_error(failure: &Failure) -> LastError {
    LastError {
        kind: failure.kind,
        message: failure.detail.clone(),
    }
}

fn failed(
    task_id: TaskId,
    history: AttemptHistory,
    last_error: LastError,
    children: Vec<DispatchOutcome>,
) -> DispatchOutcome {
    DispatchOutcome::Failed(FailureReport {
        task_id,
        history: history.into_vec(),
        last_error,
        children,
    })
}

fn cancelled(task_id: TaskId, state: DispatchState, history: AttemptHistory) -> DispatchOutcome {
    DispatchOutcome::Cancelled(CancelReport {
        task_id,
        cancelled_in: state,
        history: history.into_vec(),
    })
}
