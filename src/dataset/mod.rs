//! Benchmark dataset access.
//!
//! Provides:
//! - `DatasetLoader` / `Datapoint`: numerically ordered datapoint folders
//! - `read_task_responses` / `format_task`: generated task texts

mod datapoint;
mod tasks;

#[cfg(test)]
pub(crate) use datapoint::fixtures;
pub use datapoint::*;
pub use tasks::*;
