//! Lifecycle events and event handling.
//!
//! The engine knows nothing about alerting or metrics; it emits lifecycle
//! events to an [`EventBus`] and external collaborators subscribe with an
//! [`EventHandler`]. Registering a bus is optional; without one the executor
//! emits nothing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{RunId, TaskName};

/// Lifecycle events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A pipeline run has started.
    RunStarted {
        run_id: RunId,
        task_count: usize,
        timestamp: Instant,
    },

    /// A task acquired a worker slot and began executing.
    TaskStarted {
        run_id: RunId,
        task: TaskName,
        timestamp: Instant,
    },

    /// A task is being retried after a failed attempt.
    ///
    /// Emitted immediately before the backoff delay, so consumers observe
    /// retries in real time. `attempt` is the attempt that just failed
    /// (1-indexed); `max_attempts` is the policy's total attempt budget.
    TaskRetrying {
        run_id: RunId,
        task: TaskName,
        attempt: u32,
        max_attempts: u32,
        timestamp: Instant,
    },

    /// A task completed successfully.
    TaskSucceeded {
        run_id: RunId,
        task: TaskName,
        attempts: u32,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task failed after exhausting its retries (or was cancelled while
    /// running).
    TaskFailed {
        run_id: RunId,
        task: TaskName,
        error: String,
        attempts: u32,
        timestamp: Instant,
    },

    /// A task was skipped because an upstream task failed or was skipped,
    /// or because the run was cancelled.
    TaskSkipped {
        run_id: RunId,
        task: TaskName,
        /// The upstream task that blocked this one; `None` when the run was
        /// cancelled outright.
        blocked_on: Option<TaskName>,
        timestamp: Instant,
    },

    /// A pipeline run reached a terminal status.
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskRetrying { timestamp, .. } => *timestamp,
            Event::TaskSucceeded { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskSkipped { timestamp, .. } => *timestamp,
            Event::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(run_id: RunId, task_count: usize) -> Self {
        Event::RunStarted {
            run_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(run_id: RunId, task: TaskName) -> Self {
        Event::TaskStarted {
            run_id,
            task,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(run_id: RunId, task: TaskName, attempt: u32, max_attempts: u32) -> Self {
        Event::TaskRetrying {
            run_id,
            task,
            attempt,
            max_attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSucceeded event.
    pub fn task_succeeded(run_id: RunId, task: TaskName, attempts: u32, duration: Duration) -> Self {
        Event::TaskSucceeded {
            run_id,
            task,
            attempts,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(run_id: RunId, task: TaskName, error: String, attempts: u32) -> Self {
        Event::TaskFailed {
            run_id,
            task,
            error,
            attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSkipped event.
    pub fn task_skipped(run_id: RunId, task: TaskName, blocked_on: Option<TaskName>) -> Self {
        Event::TaskSkipped {
            run_id,
            task,
            blocked_on,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunCompleted event.
    pub fn run_completed(run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
