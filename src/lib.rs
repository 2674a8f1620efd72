//! plotbench - LLM plotting benchmark over an OpenAI-compatible chat API.
//!
//! ## Architecture
//!
//! - **Client**: builds multimodal chat requests and drives a bounded
//!   retry/backoff loop around the HTTP transport
//! - **Checkpoint**: append-only JSON-lines job logs; the ids they hold are
//!   the resume state
//! - **Pipeline**: a sequential runner plus the task, plot and judge stages
//! - **Scoring**: turns judge responses into scores and summary statistics
//!
//! ## Pipeline
//!
//! Datapoints → Tasks → Plot code → (external rendering) → Judge → Scores

pub mod checkpoint;
pub mod client;
pub mod dataset;
pub mod models;
pub mod pipeline;
pub mod scoring;

// Re-exports for convenience
pub use checkpoint::JobLog;
pub use client::{CancelToken, CompletionClient, CompletionModel, HttpTransport, ModelRequest, RequestBuilder};
pub use dataset::{Datapoint, DatasetLoader};
pub use models::{Config, PlotbenchError, Result};
pub use pipeline::{BatchRunner, JudgeStage, PlotStage, TaskStage};
