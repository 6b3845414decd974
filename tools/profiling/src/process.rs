#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Site builds run as an external command

use crate::builder::{BuildError, SiteBuild};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Builds the site by running the configured generator command once per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuild {
    /// The generator executable
    command: String,

    /// Arguments for the generator
    args: Vec<String>,

    /// Working directory for every build
    working_dir: Option<PathBuf>,
}

impl CommandBuild {
    /// Create a command-backed build
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use sitebench_profiling::{CommandBuild, SiteBuild};
    /// let mut build = CommandBuild::new("hugo", &["--quiet".to_string()]);
    /// let _ = build.build();
    /// ```
    #[must_use]
    pub fn new(command: impl Into<String>, args: &[String]) -> Self {
        Self {
            command: command.into(),
            args: args.to_vec(),
            working_dir: None,
        }
    }

    /// Run every build inside `dir`
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the generator command
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Get the generator arguments
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory (if set)
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

impl SiteBuild for CommandBuild {
    fn build(&mut self) -> Result<(), BuildError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let status = cmd.status().map_err(|e| BuildError::SpawnFailed {
            command: self.command.clone(),
            reason: e.to_string(),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Failed {
                command: self.command.clone(),
                status,
            })
        }
    }

    fn runs_out_of_process(&self) -> bool {
        true
    }
}
