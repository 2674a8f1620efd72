//! Core data models for plotbench.
//!
//! - Configuration and prompt sets, resolved once at start-up
//! - Record types: completion results, job records, score records
//! - Error types

mod config;
mod error;
mod prompts;
mod record;

pub use config::*;
pub use error::*;
pub use prompts::*;
pub use record::*;
