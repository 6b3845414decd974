#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Error types for the benchmark harness.
//!
//! Every fallible harness operation returns [`Result`]. Build failures are not
//! represented here: they belong to the site builder (see
//! [`BuildError`](crate::builder::BuildError)) and never abort a benchmark.

use std::path::PathBuf;

use thiserror::Error;

/// Harness error type.
#[derive(Debug, Error)]
pub enum ProfilingError {
    // Configuration errors
    #[error("failed to read site configuration '{path}': {reason}")]
    ConfigReadFailed { path: PathBuf, reason: String },

    #[error("failed to parse site configuration '{path}': {reason}")]
    ConfigParseFailed { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Profile artifact errors
    #[error("failed to create profile file '{path}': {source}")]
    ProfileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write profile file '{path}': {reason}")]
    ProfileWriteFailed { path: PathBuf, reason: String },

    #[error("failed to read profile file '{path}': {reason}")]
    ProfileReadFailed { path: PathBuf, reason: String },

    #[error("CPU profiler error: {0}")]
    CpuProfiler(String),

    // Heap snapshot errors
    #[error("failed to read memory metrics for process {0}: {1}")]
    MetricsReadFailed(u32, String),

    #[error("failed to parse memory metrics: {0}")]
    MetricsParseError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProfilingError {
    /// Create a profile write error.
    pub fn profile_write_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ProfileWriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a CPU profiler error.
    pub fn cpu_profiler(reason: impl ToString) -> Self {
        Self::CpuProfiler(reason.to_string())
    }
}

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, ProfilingError>;
