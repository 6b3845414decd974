#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Benchmark runner: the build loop and the profiler around it

use crate::builder::SiteBuild;
use crate::config::{BenchmarkConfig, ProfileMode};
use crate::error::{ProfilingError, Result};
use crate::metrics::{ChildUsage, HeapProbe, HeapSnapshot, ProcStatusProbe};
use crate::session::{CpuProfiler, CpuSession, PprofProfiler};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Main benchmark runner
pub struct BenchmarkRunner<C = PprofProfiler, H = ProcStatusProbe> {
    config: BenchmarkConfig,
    cpu_profiler: C,
    heap_probe: H,
}

impl BenchmarkRunner {
    /// Create a runner using the `pprof` CPU profiler and `/proc` heap snapshots
    #[must_use]
    pub const fn new(config: BenchmarkConfig) -> Self {
        let cpu_profiler = PprofProfiler::new(config.sampling_frequency());
        Self {
            config,
            cpu_profiler,
            heap_probe: ProcStatusProbe,
        }
    }
}

impl<C: CpuProfiler, H: HeapProbe> BenchmarkRunner<C, H> {
    /// Create a runner with custom profiler backends
    #[must_use]
    pub const fn with_profilers(config: BenchmarkConfig, cpu_profiler: C, heap_probe: H) -> Self {
        Self {
            config,
            cpu_profiler,
            heap_probe,
        }
    }

    /// Get the run configuration
    #[must_use]
    pub const fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run the benchmark
    ///
    /// This will:
    /// 1. Create the profile file for the selected mode
    /// 2. In CPU mode, start sampling
    /// 3. Build the site `count` times, ignoring build failures
    /// 4. Write the CPU profile, or take and write one heap snapshot
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The profile file cannot be created (no build runs)
    /// - The CPU profiler fails to start (no build runs)
    /// - The heap snapshot cannot be taken
    /// - The profile cannot be written or flushed
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use sitebench_profiling::{BenchmarkConfig, BenchmarkRunner, BuildError};
    /// # use std::path::Path;
    /// let config = BenchmarkConfig::from_flags(3, Some(Path::new("cpu.pb")), None);
    /// let mut build = || -> Result<(), BuildError> { Ok(()) };
    ///
    /// let summary = BenchmarkRunner::new(config).run(&mut build);
    /// ```
    pub fn run<B: SiteBuild + ?Sized>(&self, build: &mut B) -> Result<BenchmarkSummary> {
        let count = self.config.count();
        let mode = self.config.mode();

        info!(
            "Benchmarking {count} builds with {} profiling, output: {}",
            mode.name(),
            mode.path().display()
        );
        if count == 0 {
            warn!("Build count is 0; only an empty profile will be written");
        }

        let (elapsed, children) = match mode {
            ProfileMode::Memory(path) => self.run_memory(path, build)?,
            ProfileMode::Cpu(path) => self.run_cpu(path, build)?,
        };

        info!("Benchmark complete: {count} builds in {elapsed:?}");
        if let Some(usage) = &children {
            info!(
                "Builder processes: user {:?}, system {:?}, peak RSS {} KB",
                usage.user_time(),
                usage.system_time(),
                usage.max_rss_kb()
            );
        }

        Ok(BenchmarkSummary {
            mode: mode.clone(),
            iterations: count,
            elapsed,
            children,
        })
    }

    fn run_memory<B: SiteBuild + ?Sized>(&self, path: &Path, build: &mut B) -> Result<LoopStats> {
        let mut output = create_profile_file(path)?;

        let (elapsed, children) = self.measured_loop(build);

        let metrics = self.heap_probe.snapshot()?;
        HeapSnapshot::new(metrics, self.config.count(), elapsed)
            .with_children(children)
            .write_to(&mut output, path)?;

        Ok((elapsed, children))
    }

    fn run_cpu<B: SiteBuild + ?Sized>(&self, path: &Path, build: &mut B) -> Result<LoopStats> {
        let output = create_profile_file(path)?;
        if build.runs_out_of_process() {
            warn!(
                "Builds run in child processes; CPU samples cover only the harness, \
                 builder CPU time is reported separately"
            );
        }
        let session = CpuSession::begin(&self.cpu_profiler, output, path)?;

        let stats = self.measured_loop(build);

        session.finish()?;
        Ok(stats)
    }

    /// Run the build loop, bracketed by child usage readings
    fn measured_loop<B: SiteBuild + ?Sized>(&self, build: &mut B) -> LoopStats {
        let before = self.child_usage();
        let elapsed = build_repeatedly(self.config.count(), build);
        let after = self.child_usage();

        let children = after.zip(before).map(|(after, before)| after.since(&before));
        (elapsed, children)
    }

    fn child_usage(&self) -> Option<ChildUsage> {
        self.heap_probe
            .child_usage()
            .inspect_err(|e| warn!("Child process usage unavailable: {e}"))
            .ok()
    }
}

/// Loop wall time and the builder children's usage over it
type LoopStats = (Duration, Option<ChildUsage>);

/// Build `count` times back to back; results are deliberately dropped.
fn build_repeatedly<B: SiteBuild + ?Sized>(count: u32, build: &mut B) -> Duration {
    let start = Instant::now();
    for _ in 0..count {
        let _ = build.build();
    }
    start.elapsed()
}

fn create_profile_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| ProfilingError::ProfileCreateFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Summary of a finished benchmark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSummary {
    /// Mode that ran, with its artifact path
    mode: ProfileMode,

    /// Builds executed
    iterations: u32,

    /// Time spent in the build loop
    elapsed: Duration,

    /// Usage of builder child processes during the loop
    children: Option<ChildUsage>,
}

impl BenchmarkSummary {
    /// Get the mode that ran
    #[must_use]
    pub const fn mode(&self) -> &ProfileMode {
        &self.mode
    }

    /// Get the profile artifact path
    #[must_use]
    pub fn profile_path(&self) -> PathBuf {
        self.mode.path().to_path_buf()
    }

    /// Get the number of builds executed
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Get the loop duration
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Get the usage of builder child processes, if it could be read
    #[must_use]
    pub const fn children(&self) -> Option<&ChildUsage> {
        self.children.as_ref()
    }

    /// Mean wall time per build, if any build ran
    #[must_use]
    pub fn mean_build_time(&self) -> Option<Duration> {
        self.elapsed.checked_div(self.iterations)
    }
}
