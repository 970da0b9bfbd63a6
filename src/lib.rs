//! In-process, dependency-aware task execution.
//!
//! Define tasks as async actions, wire them into a DAG with
//! [`TaskDescriptor`] and [`Graph::build`], then hand the graph to an
//! [`Executor`]. Tasks run concurrently as their dependencies complete;
//! failures are retried per policy and cascade to dependents as skips. The
//! result is a [`PipelineRun`] report covering every task.

pub mod core;
pub mod events;
pub mod execution;

pub use self::core::descriptor::TaskDescriptor;
pub use self::core::graph::{DefinitionError, Graph};
pub use self::core::retry::RetryPolicy;
pub use self::core::task::{from_fn, FnAction, TaskAction, TaskError};
pub use self::core::types::{RunId, TaskName};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    CancelToken, Executor, FailureKind, PipelineRun, RunStatus, TaskRun, TaskStatus,
};
