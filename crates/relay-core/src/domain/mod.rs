//! Domain model (ids, tasks, envelopes, attempts, decisions, outcomes, errors).

pub mod attempt;
pub mod decision;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use attempt::{AttemptHistory, AttemptOutcome, HistoryFull, MAX_RECOVERY_ATTEMPTS, RecoveryAttempt};
pub use decision::{Bias, PolicyTable, RecoveryPolicy, Strategy};
pub use envelope::{Envelope, ExecutionStatus};
pub use errors::{
    AwaitError, DispatchError, ErrorKind, HandlerError, RegistryError, RouteError,
    ValidationError,
};
pub use ids::TaskId;
pub use outcome::{
    AggregateResult, CancelReport, DispatchOutcome, FailureReport, LastError, TaskResult,
};
pub use state::DispatchState;
pub use task::{ProblemType, Task};
