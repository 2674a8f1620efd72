//! Checkpointing for resumable batch runs.
//!
//! Provides:
//! - `JobLog`: append-only JSON-lines log whose record ids are the resume state
//! - `read_records` / `read_header`: readers for finished logs

mod job_log;

pub use job_log::*;
