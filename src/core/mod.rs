pub mod descriptor;
pub mod graph;
pub mod retry;
pub mod task;
pub mod types;
