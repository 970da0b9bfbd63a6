//! Immutable task definition records.
//!
//! A [`TaskDescriptor`] couples a task name with its action, declared
//! dependencies, retry policy, and optional per-task timeout. Descriptors are
//! created once per pipeline definition and handed to
//! [`Graph::build`](crate::Graph::build); they cannot be mutated afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::retry::RetryPolicy;
use super::task::TaskAction;
use super::types::TaskName;

/// Definition of one named unit of work.
#[derive(Clone)]
pub struct TaskDescriptor {
    name: TaskName,
    action: Arc<dyn TaskAction>,
    depends_on: Vec<TaskName>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl TaskDescriptor {
    /// Create a descriptor with no dependencies and no retries.
    pub fn new(name: impl Into<TaskName>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            name: name.into(),
            action,
            depends_on: Vec::new(),
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Declare the tasks this one depends on.
    ///
    /// Duplicate names are collapsed; declaration order is preserved.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set a per-task timeout. Exceeding it counts as an action failure and
    /// is subject to the retry policy.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The task's unique name.
    pub fn name(&self) -> &TaskName {
        &self.name
    }

    /// The action to run.
    pub fn action(&self) -> &Arc<dyn TaskAction> {
        &self.action
    }

    /// Direct predecessors, in declaration order.
    pub fn dependencies(&self) -> &[TaskName] {
        &self.depends_on
    }

    /// The task's retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The per-task timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
