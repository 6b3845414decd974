#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Configuration for a benchmark run

use crate::error::{ProfilingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of builds when no count is given
pub const DEFAULT_BUILD_COUNT: u32 = 13;

/// CPU profile destination used when neither profile path is given
pub const DEFAULT_CPU_PROFILE_PATH: &str = "/tmp/sitebench-cpuprofile";

/// Default CPU sampling frequency
pub const DEFAULT_SAMPLING_FREQUENCY_HZ: u32 = 100;

/// Highest sampling frequency the CPU profiler accepts
const MAX_SAMPLING_FREQUENCY_HZ: u32 = 10_000;

/// Which profiler surrounds the build loop, and where its artifact goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path", rename_all = "lowercase")]
pub enum ProfileMode {
    /// Sample the CPU for the whole loop.
    Cpu(PathBuf),

    /// Take one heap snapshot after the loop.
    Memory(PathBuf),
}

impl ProfileMode {
    /// Select the profiling mode from the two optional profile paths.
    ///
    /// A non-empty memory path always wins. Otherwise CPU mode is used, with
    /// [`DEFAULT_CPU_PROFILE_PATH`] standing in for a missing or empty CPU path.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sitebench_profiling::{ProfileMode, DEFAULT_CPU_PROFILE_PATH};
    /// # use std::path::Path;
    /// let mode = ProfileMode::select(None, None);
    /// assert_eq!(mode, ProfileMode::Cpu(DEFAULT_CPU_PROFILE_PATH.into()));
    ///
    /// let mode = ProfileMode::select(None, Some(Path::new("mem.json")));
    /// assert!(mode.is_memory());
    /// ```
    #[must_use]
    pub fn select(cpu_path: Option<&Path>, mem_path: Option<&Path>) -> Self {
        let non_empty = |path: &&Path| !path.as_os_str().is_empty();

        match (cpu_path.filter(non_empty), mem_path.filter(non_empty)) {
            (_, Some(mem)) => Self::Memory(mem.to_path_buf()),
            (Some(cpu), None) => Self::Cpu(cpu.to_path_buf()),
            (None, None) => Self::Cpu(PathBuf::from(DEFAULT_CPU_PROFILE_PATH)),
        }
    }

    /// Destination of the profile artifact
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Cpu(path) | Self::Memory(path) => path,
        }
    }

    /// Whether this is memory-profiling mode
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Short name used in logs and summaries
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cpu(_) => "cpu",
            Self::Memory(_) => "memory",
        }
    }
}

/// Configuration for a single benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of times the site is built
    count: u32,

    /// Selected profiler and artifact path
    mode: ProfileMode,

    /// CPU sampling frequency in Hz (ignored in memory mode)
    sampling_frequency: u32,
}

impl BenchmarkConfig {
    /// Create a configuration from an explicit mode.
    ///
    /// A `count` of zero is accepted and runs no builds; the profile artifact
    /// is still written.
    #[must_use]
    pub const fn new(count: u32, mode: ProfileMode) -> Self {
        Self {
            count,
            mode,
            sampling_frequency: DEFAULT_SAMPLING_FREQUENCY_HZ,
        }
    }

    /// Create a configuration from the raw `benchmark` command flags.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sitebench_profiling::BenchmarkConfig;
    /// # use std::path::Path;
    /// let config = BenchmarkConfig::from_flags(5, None, Some(Path::new("/tmp/mem.out")));
    /// assert_eq!(config.count(), 5);
    /// assert!(config.mode().is_memory());
    /// ```
    #[must_use]
    pub fn from_flags(count: u32, cpu_path: Option<&Path>, mem_path: Option<&Path>) -> Self {
        Self::new(count, ProfileMode::select(cpu_path, mem_path))
    }

    /// Override the CPU sampling frequency.
    ///
    /// # Errors
    ///
    /// Returns [`ProfilingError::InvalidConfig`] if `hz` is zero or above 10 000.
    pub fn with_sampling_frequency(mut self, hz: u32) -> Result<Self> {
        if hz == 0 || hz > MAX_SAMPLING_FREQUENCY_HZ {
            return Err(ProfilingError::InvalidConfig(format!(
                "sampling frequency must be between 1 and {MAX_SAMPLING_FREQUENCY_HZ} Hz, got {hz}"
            )));
        }
        self.sampling_frequency = hz;
        Ok(self)
    }

    /// Get the number of builds
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Get the profiling mode
    #[must_use]
    pub const fn mode(&self) -> &ProfileMode {
        &self.mode
    }

    /// Get the CPU sampling frequency in Hz
    #[must_use]
    pub const fn sampling_frequency(&self) -> u32 {
        self.sampling_frequency
    }
}
