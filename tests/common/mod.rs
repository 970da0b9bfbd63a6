//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use drover::{from_fn, TaskDescriptor, TaskError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared append-only log of task names, used to assert execution order.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(log: &RunLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn position(log: &[String], name: &str) -> usize {
    log.iter()
        .position(|entry| entry == name)
        .unwrap_or_else(|| panic!("{} never ran", name))
}

/// Task that appends its name to the log and succeeds.
pub fn logging(name: &'static str, log: &RunLog) -> TaskDescriptor {
    let log = log.clone();
    TaskDescriptor::new(
        name,
        from_fn(move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok(json!(name))
            }
        }),
    )
}

/// Task that succeeds immediately.
pub fn succeeding(name: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, from_fn(|| async { Ok(json!(null)) }))
}

/// Task that always fails with the given message.
pub fn failing(name: &str, message: &str) -> TaskDescriptor {
    let message = message.to_string();
    TaskDescriptor::new(
        name,
        from_fn(move || {
            let message = message.clone();
            async move { Err(TaskError::failed(message)) }
        }),
    )
}

/// Task that sleeps before succeeding.
pub fn sleeping(name: &str, delay: Duration) -> TaskDescriptor {
    TaskDescriptor::new(
        name,
        from_fn(move || async move {
            tokio::time::sleep(delay).await;
            Ok(json!(null))
        }),
    )
}

/// Task that fails its first `fail_times` calls, then succeeds.
pub fn flaky(name: &str, fail_times: u32) -> TaskDescriptor {
    let calls = Arc::new(AtomicU32::new(0));
    TaskDescriptor::new(
        name,
        from_fn(move || {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= fail_times {
                    Err(TaskError::failed(format!("transient failure {}", call)))
                } else {
                    Ok(json!(call))
                }
            }
        }),
    )
}
