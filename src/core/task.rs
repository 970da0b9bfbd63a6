//! Task action trait and error types.
//!
//! A [`TaskAction`] is the unit of work the engine dispatches. It takes no
//! engine-defined arguments (anything it needs is closed over by the caller)
//! and yields either a JSON result value or a [`TaskError`]. The engine has
//! no knowledge of what an action does; this is the seam to the surrounding
//! subsystems.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Task exceeded its per-task timeout.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// Task was cancelled while running.
    #[error("task cancelled")]
    Cancelled,

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Shorthand for a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::ExecutionFailed(message.into())
    }
}

/// The core trait for defining executable task actions.
///
/// # Example
///
/// ```ignore
/// use drover::{TaskAction, TaskError};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct RowCountCheck {
///     table: String,
/// }
///
/// #[async_trait]
/// impl TaskAction for RowCountCheck {
///     async fn run(&self) -> Result<Value, TaskError> {
///         let rows = 42; // query the table here
///         if rows == 0 {
///             return Err(TaskError::failed(format!("{} is empty", self.table)));
///         }
///         Ok(json!({ "rows": rows }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Perform the unit of work.
    ///
    /// # Returns
    /// * `Ok(value)` - the task's result, recorded in the run report
    /// * `Err(TaskError)` - the task failed; retried per its policy
    async fn run(&self) -> Result<Value, TaskError>;
}

/// Adapter that turns an async closure into a [`TaskAction`].
pub struct FnAction<F> {
    f: F,
}

impl<F> FnAction<F> {
    /// Wrap a closure returning a future.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn run(&self) -> Result<Value, TaskError> {
        (self.f)().await
    }
}

/// Convenience constructor: wrap an async closure as a shared action.
///
/// ```ignore
/// let action = drover::from_fn(|| async { Ok(serde_json::json!("done")) });
/// ```
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn TaskAction>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(FnAction::new(f))
}
