#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Site configuration loading
//!
//! The harness only needs to know how to invoke the generator. That lives in
//! the `[build]` table of `sitebench.toml` in the site source directory:
//!
//! ```toml
//! [build]
//! command = "hugo"
//! args = ["--quiet"]
//! working_dir = "."
//! ```

use crate::error::{ProfilingError, Result};
use crate::process::CommandBuild;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration file looked up in the source directory
pub const DEFAULT_CONFIG_FILE: &str = "sitebench.toml";

/// The `[build]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BuildSection {
    /// Generator executable
    command: String,

    /// Generator arguments
    #[serde(default)]
    args: Vec<String>,

    /// Working directory, relative to the source directory
    #[serde(default)]
    working_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SiteConfigFile {
    build: BuildSection,
}

/// Validated site configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    source_dir: PathBuf,
    build: BuildSection,
}

/// Load and validate the site configuration.
///
/// Reads `config_file` if given, otherwise `<source_dir>/sitebench.toml`.
///
/// # Errors
///
/// Returns error if:
/// - The source directory does not exist
/// - The configuration file cannot be read or parsed
/// - The build command is empty
pub fn initialize_config(source_dir: &Path, config_file: Option<&Path>) -> Result<SiteConfig> {
    if !source_dir.is_dir() {
        return Err(ProfilingError::InvalidConfig(format!(
            "source directory does not exist: {}",
            source_dir.display()
        )));
    }

    let path = config_file.map_or_else(|| source_dir.join(DEFAULT_CONFIG_FILE), Path::to_path_buf);
    debug!("Loading site configuration from {}", path.display());

    let contents =
        std::fs::read_to_string(&path).map_err(|e| ProfilingError::ConfigReadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    SiteConfig::parse(source_dir, &path, &contents)
}

impl SiteConfig {
    /// Parse configuration text read from `path`
    fn parse(source_dir: &Path, path: &Path, contents: &str) -> Result<Self> {
        let file: SiteConfigFile =
            toml::from_str(contents).map_err(|e| ProfilingError::ConfigParseFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if file.build.command.trim().is_empty() {
            return Err(ProfilingError::InvalidConfig(
                "build.command cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            source_dir: source_dir.to_path_buf(),
            build: file.build,
        })
    }

    /// Get the site source directory
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Get the generator command
    #[must_use]
    pub fn command(&self) -> &str {
        &self.build.command
    }

    /// Get the generator arguments
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.build.args
    }

    /// Directory the generator runs in, resolved against the source directory
    #[must_use]
    pub fn working_dir(&self) -> PathBuf {
        self.build
            .working_dir
            .as_ref()
            .map_or_else(|| self.source_dir.clone(), |dir| self.source_dir.join(dir))
    }

    /// The build operation described by this configuration
    #[must_use]
    pub fn command_build(&self) -> CommandBuild {
        CommandBuild::new(self.command(), self.args()).with_working_dir(self.working_dir())
    }
}
