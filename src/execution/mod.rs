//! Pipeline execution engine.
//!
//! This module provides the run-time half of the crate: the executor that
//! drives a validated graph to completion and the per-run state it reports.

mod executor;
mod run;

pub use executor::{CancelToken, Executor};
pub use run::{FailureKind, PipelineRun, RunStatus, TaskRun, TaskStatus};
