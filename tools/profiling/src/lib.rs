#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # sitebench-profiling
//!
//! Benchmark harness for static site builds.
//!
//! The harness builds a site a fixed number of times in a tight loop and
//! captures one profile artifact for the whole run:
//!
//! - **CPU mode**: the `pprof` sampler runs for the entire loop and the profile
//!   is written when the loop ends (or when the runner unwinds).
//! - **Memory mode**: no profiler runs during the loop; one heap snapshot is
//!   taken afterwards, reflecting steady-state memory.
//!
//! Builders that run as child processes are invisible to both, so the runner
//! also records the children's CPU time and peak RSS around the loop.
//!
//! Individual build failures never fail the benchmark.

pub mod builder;
pub mod config;
pub mod error;
pub mod metrics;
pub mod process;
pub mod runner;
pub mod session;
pub mod site;

pub use builder::{BuildError, SiteBuild};
pub use config::{
    BenchmarkConfig, DEFAULT_BUILD_COUNT, DEFAULT_CPU_PROFILE_PATH, DEFAULT_SAMPLING_FREQUENCY_HZ,
    ProfileMode,
};
pub use error::{ProfilingError, Result};
pub use metrics::{ChildUsage, HeapProbe, HeapSnapshot, MemoryMetrics, ProcStatusProbe};
pub use process::CommandBuild;
pub use runner::{BenchmarkRunner, BenchmarkSummary};
pub use session::{
    CpuProfileGuard, CpuProfiler, CpuSession, PprofProfiler, ProfileFormat, SAMPLER_BLOCKLIST,
};
pub use site::{DEFAULT_CONFIG_FILE, SiteConfig, initialize_config};
