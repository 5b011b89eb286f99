//! Error types for Skyhop

use thiserror::Error;

/// Result type for Skyhop operations
pub type Result<T> = std::result::Result<T, SkyhopError>;

/// Core error type for Skyhop operations
#[derive(Error, Debug)]
pub enum SkyhopError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trace parse error in region {region}: {reason}")]
    TraceParse { region: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Region {index} out of range ({num_regions} regions)")]
    InvalidRegion { index: usize, num_regions: usize },

    #[error("Deadline exceeded at {elapsed:.1}s with {remaining_work:.1}s of work remaining")]
    DeadlineExceeded { remaining_work: f64, elapsed: f64 },
}

impl SkyhopError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a trace parse error for a region
    pub fn trace_parse(region: usize, reason: impl Into<String>) -> Self {
        Self::TraceParse {
            region,
            reason: reason.into(),
        }
    }
}
