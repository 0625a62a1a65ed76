//! DispatchService - submit / await / cancel の非同期フロントエンド
//!
//! 各タスクは独立した tokio タスクとして走ります。
//! 同時に走るタスク同士が共有するのは Dispatcher（読み取り専用）だけです。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dispatcher::Dispatcher;
use crate::domain::errors::{AwaitError, DispatchError};
use crate::domain::ids::TaskId;
use crate::domain::outcome::DispatchOutcome;
use crate::domain::task::ProblemType;

/// What the dispatch task left behind; `None` until it finishes.
type Settled = Option<Result<DispatchOutcome, String>>;

/// Stays in the table until the outcome is collected, so the task can be
/// cancelled while someone is waiting on it.
struct InFlight {
    settled: watch::Receiver<Settled>,
    cancel: CancellationToken,
}

pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
    inflight: Mutex<HashMap<TaskId, InFlight>>,
}

impl DispatchService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Start dispatching a task and return its id without waiting.
    ///
    /// Routing is checked up front, so an unroutable problem type fails
    /// here instead of at `await_result`.
    pub async fn submit(
        &self,
        description: impl Into<String>,
        problem_type: ProblemType,
    ) -> Result<TaskId, DispatchError> {
        self.dispatcher.router().route(&problem_type)?;

        let task = self.dispatcher.new_task(description, problem_type);
        let task_id = task.id();
        let cancel = CancellationToken::new();
        let (tx, settled) = watch::channel(None);

        let dispatcher = Arc::clone(&self.dispatcher);
        let token = cancel.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .dispatch_with_cancel(task, token)
                .await
                .map_err(|e| e.to_string());
            tx.send_replace(Some(result));
        });

        self.inflight
            .lock()
            .await
            .insert(task_id, InFlight { settled, cancel });
        info!(%task_id, "task submitted");
        Ok(task_id)
    }

    /// Submit several independent tasks at once.
    ///
    /// Every problem type is routed before anything is spawned, so a
    /// configuration error submits nothing.
    pub async fn fan_out<I, S>(&self, tasks: I) -> Result<Vec<TaskId>, DispatchError>
    where
        I: IntoIterator<Item = (S, ProblemType)>,
        S: Into<String>,
    {
        let tasks: Vec<(S, ProblemType)> = tasks.into_iter().collect();
        for (_, problem_type) in &tasks {
            self.dispatcher.router().route(problem_type)?;
        }

        let mut ids = Vec::with_capacity(tasks.len());
        for (description, problem_type) in tasks {
            ids.push(self.submit(description, problem_type).await?);
        }
        Ok(ids)
    }

    /// Wait for a submitted task to reach a terminal state.
    ///
    /// The outcome can be collected once; a second call for the same id is
    /// `UnknownTask`. When `timeout` elapses first, or the returned future
    /// is dropped, the task keeps running and can be awaited or cancelled.
    pub async fn await_result(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Result<DispatchOutcome, AwaitError> {
        let mut settled = self
            .inflight
            .lock()
            .await
            .get(&task_id)
            .map(|entry| entry.settled.clone())
            .ok_or(AwaitError::UnknownTask(task_id))?;

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait_settled(&mut settled)).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(%task_id, ?limit, "await timed out, task still running");
                    return Err(AwaitError::Timeout(task_id));
                }
            },
            None => wait_settled(&mut settled).await,
        };

        // 同時に待っていた別の呼び出しが先に回収した
        if self.inflight.lock().await.remove(&task_id).is_none() {
            return Err(AwaitError::UnknownTask(task_id));
        }

        match result {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(AwaitError::Aborted { task_id, message }),
            None => Err(AwaitError::Aborted {
                task_id,
                message: "dispatch task ended without an outcome".to_string(),
            }),
        }
    }

    /// Wait for several tasks concurrently, preserving order.
    pub async fn await_all(
        &self,
        task_ids: &[TaskId],
        timeout: Option<Duration>,
    ) -> Vec<Result<DispatchOutcome, AwaitError>> {
        join_all(task_ids.iter().map(|id| self.await_result(*id, timeout))).await
    }

    /// Ask a running task to stop; its outcome becomes `Cancelled`.
    ///
    /// Returns false for ids that are unknown or already collected.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        match self.inflight.lock().await.get(&task_id) {
            Some(entry) => {
                info!(%task_id, "cancellation requested");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Submitted tasks whose outcome has not been collected yet.
    pub async fn pending(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

/// Resolves once the dispatch task publishes its result, or with `None`
/// when it went away without one (panic).
async fn wait_settled(
    settled: &mut watch::Receiver<Settled>,
) -> Option<Result<DispatchOutcome, String>> {
    settled
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|r| (*r).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::RelayBuilder;
    use crate::domain::errors::{ErrorKind, RouteError};
    use crate::domain::state::DispatchState;
    use crate::impls::ScriptedHandler;
    use crate::schema::HandlerSchema;
    use serde_json::json;

    fn service(handlers: Vec<ScriptedHandler>) -> DispatchService {
        let mut builder = RelayBuilder::new()
            .schema(HandlerSchema::new("code-analyzer").require("recommendations"))
            .unwrap()
            .schema(HandlerSchema::new("security-auditor").require("findings"))
            .unwrap()
            .route("analysis", ["code-analyzer"])
            .unwrap()
            .route("security", ["security-auditor"])
            .unwrap();
        for h in handlers {
            builder = builder.handler(h).unwrap();
        }
        DispatchService::new(Arc::new(builder.build().unwrap()))
    }

    fn analyzer_ok() -> serde_json::Value {
        ScriptedHandler::completed("code-analyzer", json!({"recommendations": ["inline"]}))
    }

    #[tokio::test]
    async fn submit_then_await() {
        let svc = service(vec![
            ScriptedHandler::new("code-analyzer").respond(analyzer_ok()),
            ScriptedHandler::new("security-auditor"),
        ]);

        let id = svc.submit("look at the parser", "analysis".into()).await.unwrap();
        let outcome = svc.await_result(id, None).await.unwrap();

        assert_eq!(outcome.task_id(), id);
        assert!(outcome.is_done());
        assert_eq!(svc.pending().await, 0);
    }

    #[tokio::test]
    async fn outcome_is_collected_once() {
        let svc = service(vec![
            ScriptedHandler::new("code-analyzer").respond(analyzer_ok()),
            ScriptedHandler::new("security-auditor"),
        ]);

        let id = svc.submit("x", "analysis".into()).await.unwrap();
        svc.await_result(id, None).await.unwrap();

        assert!(matches!(
            svc.await_result(id, None).await,
            Err(AwaitError::UnknownTask(t)) if t == id
        ));
        assert!(!svc.cancel(id).await);
    }

    #[tokio::test]
    async fn unroutable_submit_fails_fast() {
        let svc = service(vec![
            ScriptedHandler::new("code-analyzer"),
            ScriptedHandler::new("security-auditor"),
        ]);

        let err = svc.submit("x", "docs".into()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Route(RouteError::NoHandler(_))));

        // nothing is spawned when one of the tasks cannot be routed
        let err = svc
            .fan_out([
                ("a", ProblemType::from("analysis")),
                ("b", ProblemType::from("analysis+security")),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::AmbiguousProblemType));
        assert_eq!(svc.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_timeout_keeps_task_running_until_cancelled() {
        let svc = service(vec![
            ScriptedHandler::new("code-analyzer").hang(),
            ScriptedHandler::new("security-auditor"),
        ]);

        let id = svc.submit("x", "analysis".into()).await.unwrap();
        assert!(matches!(
            svc.await_result(id, Some(Duration::from_secs(1))).await,
            Err(AwaitError::Timeout(_))
        ));
        assert_eq!(svc.pending().await, 1);

        assert!(svc.cancel(id).await);
        match svc.await_result(id, None).await.unwrap() {
            DispatchOutcome::Cancelled(report) => {
                assert_eq!(report.cancelled_in, DispatchState::Awaiting)
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_reaches_a_task_someone_is_waiting_on() {
        let svc = Arc::new(service(vec![
            ScriptedHandler::new("code-analyzer").hang(),
            ScriptedHandler::new("security-auditor"),
        ]));

        let id = svc.submit("x", "analysis".into()).await.unwrap();
        let waiter = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.await_result(id, None).await })
        };
        // let the waiter block inside await_result
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(svc.cancel(id).await);
        match waiter.await.unwrap().unwrap() {
            DispatchOutcome::Cancelled(report) => {
                assert_eq!(report.task_id, id);
                assert_eq!(report.cancelled_in, DispatchState::Awaiting);
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(svc.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_await_leaves_task_collectable() {
        let svc = service(vec![
            ScriptedHandler::new("code-analyzer").hang(),
            ScriptedHandler::new("security-auditor"),
        ]);

        let id = svc.submit("x", "analysis".into()).await.unwrap();
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), svc.await_result(id, None)).await;
        assert!(abandoned.is_err());
        assert_eq!(svc.pending().await, 1);

        assert!(svc.cancel(id).await);
        assert!(matches!(
            svc.await_result(id, None).await,
            Ok(DispatchOutcome::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn fan_out_tasks_are_independent() {
        let svc = service(vec![
            ScriptedHandler::new("code-analyzer").respond(analyzer_ok()),
            ScriptedHandler::new("security-auditor").respond(ScriptedHandler::envelope(
                "security-auditor",
                "error",
                json!({}),
            )),
        ]);

        let ids = svc
            .fan_out([
                ("profile", ProblemType::from("analysis")),
                ("audit", ProblemType::from("security")),
            ])
            .await
            .unwrap();
        let outcomes = svc.await_all(&ids, None).await;

        assert!(outcomes[0].as_ref().unwrap().is_done());
        let failed = outcomes[1].as_ref().unwrap().as_failure().unwrap();
        assert_eq!(failed.task_id, ids[1]);
        assert_eq!(
            failed.last_error.kind,
            ErrorKind::HandlersExhausted
        );
    }
}
