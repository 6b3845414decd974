#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! The build operation being benchmarked.

use std::process::ExitStatus;

use thiserror::Error;

/// Failure of a single site build.
///
/// The harness discards these; they exist so builders can report failure
/// through a typed channel.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to spawn site builder '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("site builder '{command}' exited with {status}")]
    Failed { command: String, status: ExitStatus },

    #[error("site build failed: {0}")]
    Other(String),
}

/// One build of the site.
pub trait SiteBuild {
    /// Run a single build to completion.
    ///
    /// # Errors
    ///
    /// Returns the builder's own failure; the benchmark ignores it.
    fn build(&mut self) -> Result<(), BuildError>;

    /// Whether the work happens in a child process.
    ///
    /// In-process samplers and `/proc/self` readings cannot see such builds.
    fn runs_out_of_process(&self) -> bool {
        false
    }
}

impl<F> SiteBuild for F
where
    F: FnMut() -> Result<(), BuildError>,
{
    fn build(&mut self) -> Result<(), BuildError> {
        self()
    }
}
