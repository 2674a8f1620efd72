//! Error types for plotbench.
//!
//! Taxonomy:
//! - Setup failures: configuration, tokenizer, prompt files (fatal, never retried)
//! - Infrastructure failures: network, timeout, API errors (retried by the engine)
//! - Invariant violations: bugs

use thiserror::Error;

/// Top-level error type for plotbench.
#[derive(Debug, Error)]
pub enum PlotbenchError {
    // ═══════════════════════════════════════════════════════════════════
    // SETUP: expected failures, surfaced immediately
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE: absorbed by the retry engine
    // ═══════════════════════════════════════════════════════════════════
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT VIOLATED: bug, should not happen
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlotbenchError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the engine may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_) | Self::Api { .. })
    }
}

/// Result type alias for plotbench.
pub type Result<T> = std::result::Result<T, PlotbenchError>;
