//! Complete pipeline integration tests.
//!
//! Tests that verify full runs from definition to report, including event
//! delivery and output propagation.

use async_trait::async_trait;
use drover::{
    from_fn, Event, EventBus, EventHandler, Executor, Graph, RunStatus, TaskDescriptor,
    TaskStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::common;

/// Recording event handler for verifying events.
struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

#[tokio::test]
async fn test_etl_pipeline_runs_to_completion() {
    let log = common::run_log();
    let graph = Graph::build(vec![
        common::logging("extract", &log),
        common::logging("validate", &log).depends_on(["extract"]),
        common::logging("transform", &log).depends_on(["validate"]),
        common::logging("load", &log).depends_on(["transform"]),
    ])
    .unwrap();

    let report = Executor::new().run(&graph).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.succeeded_count(), 4);
    assert!(report.is_complete());
    assert_eq!(
        common::recorded(&log),
        vec!["extract", "validate", "transform", "load"]
    );
}

#[tokio::test]
async fn test_fan_out_fan_in_respects_dependencies() {
    let log = common::run_log();
    let graph = Graph::build(vec![
        common::logging("source", &log),
        common::logging("shard-1", &log).depends_on(["source"]),
        common::logging("shard-2", &log).depends_on(["source"]),
        common::logging("shard-3", &log).depends_on(["source"]),
        common::logging("merge", &log).depends_on(["shard-1", "shard-2", "shard-3"]),
    ])
    .unwrap();

    let report = Executor::new().run(&graph).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    let log = common::recorded(&log);
    assert_eq!(common::position(&log, "source"), 0);
    assert_eq!(common::position(&log, "merge"), 4);
}

#[tokio::test]
async fn test_wide_graph_overlaps_under_the_concurrency_cap() {
    let descriptors: Vec<TaskDescriptor> = (0..8)
        .map(|i| common::sleeping(&format!("worker-{}", i), Duration::from_millis(50)))
        .collect();
    let graph = Graph::build(descriptors).unwrap();

    let start = Instant::now();
    let report = Executor::new().with_max_concurrency(4).run(&graph).await;
    let elapsed = start.elapsed();

    assert_eq!(report.status, RunStatus::Succeeded);
    // Eight 50ms tasks at width 4 need two batches; serial would be 400ms.
    assert!(elapsed >= Duration::from_millis(100), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(350), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_task_outputs_appear_in_report() {
    let graph = Graph::build(vec![
        TaskDescriptor::new(
            "extract",
            from_fn(|| async { Ok(json!({ "rows": 1200, "source": "orders" })) }),
        ),
        TaskDescriptor::new("load", from_fn(|| async { Ok(json!({ "written": 1200 })) }))
            .depends_on(["extract"]),
    ])
    .unwrap();

    let report = Executor::new().run(&graph).await;

    assert_eq!(
        report.task("extract").unwrap().output,
        Some(json!({ "rows": 1200, "source": "orders" }))
    );
    assert_eq!(
        report.task("load").unwrap().output,
        Some(json!({ "written": 1200 }))
    );
}

#[tokio::test]
async fn test_report_serializes_as_json() {
    let graph = Graph::build(vec![
        common::succeeding("a"),
        common::succeeding("b").depends_on(["a"]),
    ])
    .unwrap();

    let report = Executor::new().run(&graph).await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], json!("succeeded"));
    assert_eq!(json["tasks"]["a"]["status"], json!("succeeded"));
    assert_eq!(json["tasks"]["b"]["attempts"], json!(1));
    assert!(json["run_id"].is_string());
    assert!(json["finished_at"].is_string());
}

#[tokio::test]
async fn test_events_cover_every_task() {
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    let graph = Graph::build(vec![
        common::succeeding("extract"),
        common::succeeding("transform").depends_on(["extract"]),
        common::succeeding("load").depends_on(["transform"]),
    ])
    .unwrap();

    let report = Executor::new().with_event_bus(bus).run(&graph).await;
    assert_eq!(report.status, RunStatus::Succeeded);

    let events = handler.events().await;
    assert!(matches!(events.first(), Some(Event::RunStarted { task_count: 3, .. })));
    assert!(matches!(events.last(), Some(Event::RunCompleted { success: true, .. })));

    let started: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::TaskStarted { task, .. } => Some(task.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["extract", "transform", "load"]);

    let succeeded = events
        .iter()
        .filter(|e| matches!(e, Event::TaskSucceeded { .. }))
        .count();
    assert_eq!(succeeded, 3);
}

#[tokio::test]
async fn test_run_ids_are_unique_per_run() {
    let graph = Graph::build(vec![common::succeeding("only")]).unwrap();
    let executor = Executor::new();

    let first = executor.run(&graph).await;
    let second = executor.run(&graph).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.task_status("only"), Some(TaskStatus::Succeeded));
    assert_eq!(second.task_status("only"), Some(TaskStatus::Succeeded));
}
