//! Concurrent DAG execution.
//!
//! [`Executor`] runs a validated [`Graph`] to completion: every task is
//! dispatched as soon as all of its predecessors have succeeded, subject to an
//! optional concurrency limit. Failures cascade to transitive dependents as
//! skips; independent branches keep running. The executor itself holds no
//! per-run state, so one instance can run many graphs.
//!
//! Internally the run is coordinated by a single loop that owns the
//! [`PipelineRun`]. Workers are spawned per task and report back over a
//! channel; all bookkeeping happens in the coordinator, so no lock guards any
//! run state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::core::graph::Graph;
use crate::core::retry::RetryPolicy;
use crate::core::task::{TaskAction, TaskError};
use crate::core::types::{RunId, TaskName};
use crate::events::{Event, EventBus};

use super::run::{FailureKind, PipelineRun, RunStatus, TaskStatus};

/// Cooperative cancellation signal for a pipeline run.
///
/// Cloning the token shares the underlying signal; cancelling any clone
/// cancels them all. Cancellation is one-way and idempotent.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; pending forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender gone without ever cancelling.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal result of one worker.
enum Outcome {
    Succeeded { output: Value, attempts: u32 },
    Failed { error: String, attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Messages workers send the coordinator.
enum WorkerMessage {
    /// The worker acquired a concurrency permit and began its first attempt.
    Started { task: TaskName },
    /// The worker is done; exactly one per spawned worker, even on panic.
    Finished { task: TaskName, outcome: Outcome },
}

/// Runs pipeline graphs.
///
/// # Example
///
/// ```ignore
/// use drover::{Executor, Graph, TaskDescriptor, from_fn};
/// use serde_json::json;
///
/// # async fn demo() {
/// let graph = Graph::build(vec![
///     TaskDescriptor::new("extract", from_fn(|| async { Ok(json!(120)) })),
///     TaskDescriptor::new("load", from_fn(|| async { Ok(json!(null)) }))
///         .depends_on(["extract"]),
/// ])
/// .unwrap();
///
/// let report = Executor::new().with_max_concurrency(4).run(&graph).await;
/// assert!(report.is_complete());
/// # }
/// ```
pub struct Executor {
    max_concurrency: Option<usize>,
    run_timeout: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl Executor {
    /// Create an executor with unlimited concurrency and no run timeout.
    pub fn new() -> Self {
        Self {
            max_concurrency: None,
            run_timeout: None,
            event_bus: None,
        }
    }

    /// Cap the number of tasks running at once. A limit of zero is treated
    /// as one.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Abort the whole run if it exceeds this wall-clock budget.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Attach an event bus; lifecycle events are emitted to it during runs.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run a graph to completion and return the run report.
    pub async fn run(&self, graph: &Graph) -> PipelineRun {
        self.run_with_cancel(graph, CancelToken::new()).await
    }

    /// Run a graph with an externally held cancellation token.
    ///
    /// Cancelling the token skips every task not yet running, signals
    /// running tasks to stop, and waits for them before returning. The
    /// returned report always covers every task in the graph.
    pub async fn run_with_cancel(&self, graph: &Graph, cancel: CancelToken) -> PipelineRun {
        let run_id = RunId::new();
        let mut run = PipelineRun::new(run_id.clone(), graph.task_names());

        info!(run_id = %run_id, task_count = graph.len(), "starting pipeline run");
        self.emit(Event::run_started(run_id.clone(), graph.len())).await;

        if cancel.is_cancelled() {
            warn!(run_id = %run_id, "run cancelled before any task was dispatched");
            run.failure = Some(FailureKind::Cancelled);
            self.skip_remaining(&mut run).await;
            return self.finalize(run).await;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let semaphore = Arc::new(Semaphore::new(
            self.max_concurrency.unwrap_or(Semaphore::MAX_PERMITS),
        ));

        // Workers observe this token; the caller's token and the run timeout
        // both feed it.
        let internal = CancelToken::new();

        let mut pending_preds: HashMap<TaskName, usize> = graph
            .task_names()
            .map(|name| (name.clone(), graph.predecessors_of(name).len()))
            .collect();

        let mut remaining = graph.len();

        let seeds: Vec<TaskName> = graph
            .task_names()
            .filter(|name| pending_preds[*name] == 0)
            .cloned()
            .collect();
        for name in &seeds {
            self.dispatch(graph, &mut run, name, &tx, &semaphore, &internal)
                .await;
        }

        let deadline = self.run_timeout.map(|budget| Instant::now() + budget);

        while remaining > 0 {
            // Abort signals take priority over completions, so a cancel is
            // acted on before any further task is dispatched.
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !internal.is_cancelled() => {
                    warn!(run_id = %run.run_id, "pipeline run cancelled");
                    internal.cancel();
                    run.failure.get_or_insert(FailureKind::Cancelled);
                    remaining -= self.skip_remaining(&mut run).await;
                }
                _ = wait_deadline(deadline), if !internal.is_cancelled() => {
                    warn!(run_id = %run.run_id, timeout = ?self.run_timeout, "pipeline run timed out");
                    internal.cancel();
                    run.failure.get_or_insert(FailureKind::RunTimeout);
                    remaining -= self.skip_remaining(&mut run).await;
                }
                Some(msg) = rx.recv() => match msg {
                    WorkerMessage::Started { task } => {
                        self.note_started(&mut run, &task).await;
                    }
                    WorkerMessage::Finished { task, outcome } => {
                        remaining -= 1;
                        let skipped = self
                            .handle_completion(graph, &mut run, &mut pending_preds, task, outcome, &tx, &semaphore, &internal)
                            .await;
                        remaining -= skipped;
                    }
                },
            }
        }

        self.finalize(run).await
    }

    /// Mark a task ready and spawn its worker.
    ///
    /// The task stays `Ready` until the worker actually acquires a
    /// concurrency permit; the `Running` transition happens in
    /// [`note_started`](Self::note_started) when the worker reports back.
    async fn dispatch(
        &self,
        graph: &Graph,
        run: &mut PipelineRun,
        name: &TaskName,
        tx: &mpsc::UnboundedSender<WorkerMessage>,
        semaphore: &Arc<Semaphore>,
        cancel: &CancelToken,
    ) {
        let desc = graph
            .descriptor(name)
            .expect("dispatched task exists in the graph");
        run.tasks
            .get_mut(name)
            .expect("dispatched task exists in the run")
            .transition(TaskStatus::Ready);
        debug!(run_id = %run.run_id, task = %name, "queueing task");

        let task = name.clone();
        let action = Arc::clone(desc.action());
        let retry = desc.retry_policy().clone();
        let task_timeout = desc.timeout();
        let semaphore = Arc::clone(semaphore);
        let cancel = cancel.clone();
        let bus = self.event_bus.clone();
        let run_id = run.run_id.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            // The worker runs as its own task so a panicking action unwinds
            // only that task; the join error is folded back into a normal
            // completion and the run keeps going.
            let handle = tokio::spawn(worker(
                task.clone(),
                action,
                retry,
                task_timeout,
                semaphore,
                cancel,
                bus,
                run_id,
                tx.clone(),
            ));
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    let payload = err.into_panic();
                    let detail = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Outcome::Failed {
                        error: format!("task panicked: {}", detail),
                        attempts: 1,
                    }
                }
                Err(_) => Outcome::Cancelled { attempts: 0 },
            };
            // The coordinator keeps the receiver open until every worker has
            // reported, so this send cannot fail during a run.
            let _ = tx.send(WorkerMessage::Finished { task, outcome });
        });
    }

    /// A worker acquired its permit: mark the task running.
    async fn note_started(&self, run: &mut PipelineRun, name: &TaskName) {
        {
            let task = run
                .tasks
                .get_mut(name)
                .expect("started task exists in the run");
            task.transition(TaskStatus::Running);
            task.started_at = Some(Utc::now());
        }
        debug!(run_id = %run.run_id, task = %name, "task started");
        self.emit(Event::task_started(run.run_id.clone(), name.clone()))
            .await;
    }

    /// Fold one worker's outcome into the run; returns how many further
    /// tasks were driven terminal by skipping.
    #[allow(clippy::too_many_arguments)]
    async fn handle_completion(
        &self,
        graph: &Graph,
        run: &mut PipelineRun,
        pending_preds: &mut HashMap<TaskName, usize>,
        name: TaskName,
        outcome: Outcome,
        tx: &mpsc::UnboundedSender<WorkerMessage>,
        semaphore: &Arc<Semaphore>,
        internal: &CancelToken,
    ) -> usize {
        match outcome {
            Outcome::Succeeded { output, attempts } => {
                let duration;
                {
                    let task = run
                        .tasks
                        .get_mut(&name)
                        .expect("completed task exists in the run");
                    task.transition(TaskStatus::Succeeded);
                    task.attempts = attempts;
                    task.finished_at = Some(Utc::now());
                    task.output = Some(output);
                    duration = task.duration().unwrap_or_default();
                }
                debug!(run_id = %run.run_id, task = %name, attempts, "task succeeded");
                self.emit(Event::task_succeeded(
                    run.run_id.clone(),
                    name.clone(),
                    attempts,
                    duration,
                ))
                .await;

                if !internal.is_cancelled() {
                    let dependents: Vec<TaskName> = graph.dependents_of(&name).to_vec();
                    for dep in dependents {
                        let count = pending_preds
                            .get_mut(&dep)
                            .expect("every task has a predecessor count");
                        *count = count.saturating_sub(1);
                        if *count == 0 && run.task_status(dep.as_str()) == Some(TaskStatus::Pending)
                        {
                            self.dispatch(graph, run, &dep, tx, semaphore, internal).await;
                        }
                    }
                }
                0
            }
            Outcome::Failed { error, attempts } => {
                {
                    let task = run
                        .tasks
                        .get_mut(&name)
                        .expect("completed task exists in the run");
                    task.transition(TaskStatus::Failed);
                    task.attempts = attempts;
                    task.finished_at = Some(Utc::now());
                    task.error = Some(error.clone());
                }
                warn!(run_id = %run.run_id, task = %name, attempts, error = %error, "task failed");
                if run.first_failed.is_none() {
                    run.first_failed = Some(name.clone());
                }
                run.failure.get_or_insert(FailureKind::TaskFailed);
                self.emit(Event::task_failed(
                    run.run_id.clone(),
                    name.clone(),
                    error,
                    attempts,
                ))
                .await;

                self.skip_dependents(graph, run, &name).await
            }
            Outcome::Cancelled { attempts } => {
                // A worker still queued for a permit never started; its task
                // is skipped outright. A running one ends failed.
                if run.task_status(name.as_str()) == Some(TaskStatus::Ready) {
                    {
                        let task = run
                            .tasks
                            .get_mut(&name)
                            .expect("completed task exists in the run");
                        task.transition(TaskStatus::Skipped);
                        task.finished_at = Some(Utc::now());
                    }
                    debug!(run_id = %run.run_id, task = %name, "skipping task; cancelled while queued");
                    self.emit(Event::task_skipped(run.run_id.clone(), name.clone(), None))
                        .await;
                } else {
                    let error = TaskError::Cancelled.to_string();
                    {
                        let task = run
                            .tasks
                            .get_mut(&name)
                            .expect("completed task exists in the run");
                        task.transition(TaskStatus::Failed);
                        task.attempts = attempts;
                        task.finished_at = Some(Utc::now());
                        task.error = Some(error.clone());
                    }
                    debug!(run_id = %run.run_id, task = %name, "task stopped by cancellation");
                    self.emit(Event::task_failed(
                        run.run_id.clone(),
                        name.clone(),
                        error,
                        attempts,
                    ))
                    .await;
                }

                // Usually a no-op: the abort path has already skipped every
                // pending task.
                self.skip_dependents(graph, run, &name).await
            }
        }
    }

    /// Skip every not-yet-dispatched transitive dependent of a failed task.
    ///
    /// Only `Pending` tasks are touched here: a dependent can only be
    /// `Ready` once all its predecessors succeeded, so it is never in a
    /// failed task's cascade.
    async fn skip_dependents(&self, graph: &Graph, run: &mut PipelineRun, failed: &TaskName) -> usize {
        let mut skipped: Vec<(TaskName, TaskName)> = Vec::new();
        let mut stack: Vec<(TaskName, TaskName)> = graph
            .dependents_of(failed)
            .iter()
            .map(|dep| (dep.clone(), failed.clone()))
            .collect();

        while let Some((name, blocked_on)) = stack.pop() {
            let task = run
                .tasks
                .get_mut(&name)
                .expect("dependent exists in the run");
            if task.status == TaskStatus::Pending {
                task.transition(TaskStatus::Skipped);
                task.finished_at = Some(Utc::now());
                for next in graph.dependents_of(&name) {
                    stack.push((next.clone(), name.clone()));
                }
                skipped.push((name, blocked_on));
            }
        }

        for (name, blocked_on) in &skipped {
            debug!(run_id = %run.run_id, task = %name, blocked_on = %blocked_on, "skipping task; upstream failed");
            self.emit(Event::task_skipped(
                run.run_id.clone(),
                name.clone(),
                Some(blocked_on.clone()),
            ))
            .await;
        }
        skipped.len()
    }

    /// Skip every pending task, used when the whole run is aborted.
    ///
    /// `Ready` tasks are left alone: their queued workers observe the cancel
    /// signal and report back, and the coordinator skips them then.
    async fn skip_remaining(&self, run: &mut PipelineRun) -> usize {
        let mut skipped: Vec<TaskName> = Vec::new();
        for task in run.tasks.values_mut() {
            if task.status == TaskStatus::Pending {
                task.transition(TaskStatus::Skipped);
                task.finished_at = Some(Utc::now());
                skipped.push(task.name.clone());
            }
        }
        for name in &skipped {
            debug!(run_id = %run.run_id, task = %name, "skipping task; run aborted");
            self.emit(Event::task_skipped(run.run_id.clone(), name.clone(), None))
                .await;
        }
        skipped.len()
    }

    async fn finalize(&self, mut run: PipelineRun) -> PipelineRun {
        run.finished_at = Some(Utc::now());
        run.status = if run.failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        info!(
            run_id = %run.run_id,
            status = ?run.status,
            succeeded = run.succeeded_count(),
            failed = run.failed_count(),
            skipped = run.skipped_count(),
            "pipeline run complete"
        );
        self.emit(Event::run_completed(
            run.run_id.clone(),
            run.status == RunStatus::Succeeded,
            run.duration().unwrap_or_default(),
        ))
        .await;
        run
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// One task's attempt loop: acquire a concurrency permit, report the start,
/// run the action with its timeout, retry per policy, stop on cancellation.
#[allow(clippy::too_many_arguments)]
async fn worker(
    name: TaskName,
    action: Arc<dyn TaskAction>,
    retry: RetryPolicy,
    task_timeout: Option<Duration>,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
    bus: Option<Arc<EventBus>>,
    run_id: RunId,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) -> Outcome {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Outcome::Cancelled { attempts: 0 },
        permit = Arc::clone(&semaphore).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Outcome::Cancelled { attempts: 0 },
        },
    };
    let _ = tx.send(WorkerMessage::Started { task: name.clone() });

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let attempt = async {
            match task_timeout {
                Some(limit) => match timeout(limit, action.run()).await {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::Timeout(limit)),
                },
                None => action.run().await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled { attempts },
            result = attempt => result,
        };

        match result {
            Ok(output) => return Outcome::Succeeded { output, attempts },
            Err(err) => {
                if !retry.should_retry(attempts) {
                    return Outcome::Failed {
                        error: err.to_string(),
                        attempts,
                    };
                }
                let delay = retry.delay_for(attempts);
                debug!(
                    task = %name,
                    attempt = attempts,
                    max_attempts = retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; retrying after backoff"
                );
                if let Some(bus) = &bus {
                    bus.emit(Event::task_retrying(
                        run_id.clone(),
                        name.clone(),
                        attempts,
                        retry.max_attempts,
                    ))
                    .await;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Outcome::Cancelled { attempts },
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}
