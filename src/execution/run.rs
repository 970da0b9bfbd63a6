//! Per-run state: task runs, the pipeline run aggregate, and the run report.
//!
//! A [`PipelineRun`] is mutated only by the executor's coordinator for the
//! duration of one run; once its status leaves [`RunStatus::Running`] it is a
//! read-only snapshot, safe to hand to alerting or metrics collaborators and
//! to serialize as JSON.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::{RunId, TaskName};

/// Status of one task within a pipeline run.
///
/// Transitions are forward-only:
/// `Pending -> Ready -> Running -> {Succeeded | Failed}`, or
/// `Pending/Ready -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on at least one predecessor.
    Pending,
    /// Every predecessor succeeded; queued for a worker slot.
    Ready,
    /// Holding a worker slot and executing its action.
    Running,
    /// Terminal: the action returned a result.
    Succeeded,
    /// Terminal: the action failed after exhausting its retries.
    Failed,
    /// Terminal: never ran, because an upstream task failed or the run was
    /// aborted before it started.
    Skipped,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Why a run ended [`RunStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// At least one task failed after exhausting its retries.
    TaskFailed,
    /// The run was explicitly cancelled by the caller.
    Cancelled,
    /// The whole-run timeout elapsed.
    RunTimeout,
}

/// Mutable per-execution state for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRun {
    pub name: TaskName,
    pub status: TaskStatus,
    /// Number of attempts made (0 = never dispatched).
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Result value from a succeeded action.
    pub output: Option<Value>,
    /// Human-readable error detail for a failed task.
    pub error: Option<String>,
}

impl TaskRun {
    pub(crate) fn new(name: TaskName) -> Self {
        Self {
            name,
            status: TaskStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
        }
    }

    pub(crate) fn transition(&mut self, next: TaskStatus) {
        debug_assert!(
            transition_allowed(self.status, next),
            "invalid transition {:?} -> {:?} for task {}",
            self.status,
            next,
            self.name
        );
        self.status = next;
    }

    /// Wall-clock duration, if the task both started and finished.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

fn transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Ready)
            | (Pending, Skipped)
            | (Ready, Running)
            | (Ready, Skipped)
            | (Running, Succeeded)
            | (Running, Failed)
    )
}

/// The aggregate state and final report of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub status: RunStatus,
    pub tasks: HashMap<TaskName, TaskRun>,
    /// The first task whose terminal status is `Failed`, if any.
    pub first_failed: Option<TaskName>,
    /// Why the run failed; `None` while running or when succeeded.
    pub failure: Option<FailureKind>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub(crate) fn new<'a>(run_id: RunId, names: impl Iterator<Item = &'a TaskName>) -> Self {
        let tasks = names
            .map(|name| (name.clone(), TaskRun::new(name.clone())))
            .collect();
        Self {
            run_id,
            status: RunStatus::Running,
            tasks,
            first_failed: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Look up one task's run state by name.
    pub fn task(&self, name: &str) -> Option<&TaskRun> {
        self.tasks.get(&TaskName::new(name))
    }

    /// Status of one task, if it exists in the run.
    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.task(name).map(|t| t.status)
    }

    /// Number of tasks in a given status.
    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Number of succeeded tasks.
    pub fn succeeded_count(&self) -> usize {
        self.count(TaskStatus::Succeeded)
    }

    /// Number of failed tasks.
    pub fn failed_count(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    /// Number of skipped tasks.
    pub fn skipped_count(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }

    /// Whether every task reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// Wall-clock duration of the whole run, once finished.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}
