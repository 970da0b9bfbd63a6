//! Cancellation and timeout integration tests.

use drover::{
    from_fn, CancelToken, Executor, FailureKind, Graph, RunStatus, TaskDescriptor, TaskStatus,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::common;

#[tokio::test]
async fn test_cancel_mid_run_returns_a_complete_report() {
    let graph = Graph::build(vec![
        common::sleeping("slow-1", Duration::from_secs(30)),
        common::sleeping("slow-2", Duration::from_secs(30)),
        common::succeeding("after-1").depends_on(["slow-1"]),
        common::succeeding("after-2").depends_on(["slow-2"]),
    ])
    .unwrap();

    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let report = Executor::new().run_with_cancel(&graph, token).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure, Some(FailureKind::Cancelled));
    assert_eq!(report.task_status("slow-1"), Some(TaskStatus::Failed));
    assert_eq!(report.task_status("slow-2"), Some(TaskStatus::Failed));
    assert_eq!(report.task_status("after-1"), Some(TaskStatus::Skipped));
    assert_eq!(report.task_status("after-2"), Some(TaskStatus::Skipped));
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_work_finished_before_cancel_is_kept() {
    let graph = Graph::build(vec![
        common::succeeding("fast"),
        common::sleeping("slow", Duration::from_secs(30)).depends_on(["fast"]),
    ])
    .unwrap();

    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = Executor::new().run_with_cancel(&graph, token).await;

    assert_eq!(report.task_status("fast"), Some(TaskStatus::Succeeded));
    assert_eq!(report.task_status("slow"), Some(TaskStatus::Failed));
    assert_eq!(report.failure, Some(FailureKind::Cancelled));
}

#[tokio::test]
async fn test_task_can_cancel_its_own_run() {
    let token = CancelToken::new();
    let inner = token.clone();
    let graph = Graph::build(vec![
        TaskDescriptor::new(
            "tripwire",
            from_fn(move || {
                let token = inner.clone();
                async move {
                    token.cancel();
                    Ok(json!(null))
                }
            }),
        ),
        common::sleeping("slow", Duration::from_secs(30)),
        common::succeeding("after").depends_on(["tripwire"]),
    ])
    .unwrap();

    let report = Executor::new().run_with_cancel(&graph, token).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure, Some(FailureKind::Cancelled));
    assert_eq!(report.task_status("after"), Some(TaskStatus::Skipped));
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_run_timeout_cuts_off_a_stuck_pipeline() {
    let graph = Graph::build(vec![
        common::succeeding("fast"),
        common::sleeping("stuck", Duration::from_secs(30)).depends_on(["fast"]),
        common::succeeding("never").depends_on(["stuck"]),
    ])
    .unwrap();

    let start = Instant::now();
    let report = Executor::new()
        .with_run_timeout(Duration::from_millis(100))
        .run(&graph)
        .await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure, Some(FailureKind::RunTimeout));
    assert_eq!(report.task_status("fast"), Some(TaskStatus::Succeeded));
    assert_eq!(report.task_status("stuck"), Some(TaskStatus::Failed));
    assert_eq!(report.task_status("never"), Some(TaskStatus::Skipped));
}

#[tokio::test]
async fn test_generous_run_timeout_does_not_interfere() {
    let graph = Graph::build(vec![
        common::sleeping("quick", Duration::from_millis(20)),
        common::succeeding("after").depends_on(["quick"]),
    ])
    .unwrap();

    let report = Executor::new()
        .with_run_timeout(Duration::from_secs(30))
        .run(&graph)
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(report.failure.is_none());
}

#[tokio::test]
async fn test_per_task_timeout_only_fails_the_slow_task() {
    let graph = Graph::build(vec![
        common::sleeping("stuck", Duration::from_secs(30)).with_timeout(Duration::from_millis(50)),
        common::sleeping("fine", Duration::from_millis(20)).with_timeout(Duration::from_secs(5)),
    ])
    .unwrap();

    let report = Executor::new().run(&graph).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.task_status("stuck"), Some(TaskStatus::Failed));
    assert_eq!(report.task_status("fine"), Some(TaskStatus::Succeeded));
    assert!(report
        .task("stuck")
        .unwrap()
        .error
        .as_ref()
        .unwrap()
        .contains("timed out"));
}
