#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! CPU profiling sessions
//!
//! A [`CpuSession`] owns the running sampler and the open profile file. It is
//! stopped and flushed exactly once: by [`CpuSession::finish`] on the normal
//! path, or by `Drop` if the loop exits any other way.

use crate::error::{ProfilingError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Something that can start CPU sampling
pub trait CpuProfiler {
    /// Handle to a running sampler
    type Guard: CpuProfileGuard;

    /// Start sampling the current process.
    ///
    /// `path` is the artifact destination; implementations may pick an output
    /// format from it.
    ///
    /// # Errors
    ///
    /// Returns error if the sampler cannot be started.
    fn start(&self, path: &Path) -> Result<Self::Guard>;
}

/// A running CPU sampler
pub trait CpuProfileGuard {
    /// Stop sampling and write the collected profile to `output`.
    ///
    /// # Errors
    ///
    /// Returns error if the profile cannot be built or written.
    fn stop_into(self, output: &mut File, path: &Path) -> Result<()>;
}

/// Encoding of the CPU profile artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFormat {
    /// pprof protobuf, readable by `go tool pprof` and friends
    Pprof,

    /// Flamegraph SVG
    Flamegraph,
}

impl ProfileFormat {
    /// Pick the format from the artifact path (`.svg` means flamegraph)
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("svg") => Self::Flamegraph,
            _ => Self::Pprof,
        }
    }
}

/// CPU profiler backed by the `pprof` sampling profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PprofProfiler {
    frequency: u32,
}

impl PprofProfiler {
    /// Create a profiler sampling at `frequency` Hz
    #[must_use]
    pub const fn new(frequency: u32) -> Self {
        Self { frequency }
    }

    /// Get the sampling frequency
    #[must_use]
    pub const fn frequency(&self) -> u32 {
        self.frequency
    }
}

/// Shared objects the sampler never unwinds through
pub const SAMPLER_BLOCKLIST: &[&str] = &["libc", "libgcc", "pthread", "vdso"];

#[cfg(unix)]
pub use self::unix::PprofGuard;

#[cfg(unix)]
mod unix {
    use super::{CpuProfileGuard, CpuProfiler, PprofProfiler, ProfileFormat};
    use crate::error::{ProfilingError, Result};
    use pprof::protos::Message;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    /// Running `pprof` sampler
    pub struct PprofGuard {
        guard: pprof::ProfilerGuard<'static>,
        format: ProfileFormat,
    }

    impl CpuProfiler for PprofProfiler {
        type Guard = PprofGuard;

        fn start(&self, path: &Path) -> Result<PprofGuard> {
            let frequency = i32::try_from(self.frequency).map_err(ProfilingError::cpu_profiler)?;
            let builder = pprof::ProfilerGuardBuilder::default().frequency(frequency);
            // Unwinding from a signal that lands inside these can deadlock.
            #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
            let builder = builder.blocklist(super::SAMPLER_BLOCKLIST);
            let guard = builder.build().map_err(ProfilingError::cpu_profiler)?;

            Ok(PprofGuard {
                guard,
                format: ProfileFormat::for_path(path),
            })
        }
    }

    impl CpuProfileGuard for PprofGuard {
        fn stop_into(self, output: &mut File, path: &Path) -> Result<()> {
            let report = self
                .guard
                .report()
                .build()
                .map_err(ProfilingError::cpu_profiler)?;
            // Sampling stops here; the report already holds every sample.
            drop(self.guard);

            match self.format {
                ProfileFormat::Pprof => {
                    let profile = report.pprof().map_err(ProfilingError::cpu_profiler)?;
                    output
                        .write_all(&profile.encode_to_vec())
                        .map_err(|e| ProfilingError::profile_write_failed(path, e))
                }
                ProfileFormat::Flamegraph => report
                    .flamegraph(output)
                    .map_err(|e| ProfilingError::profile_write_failed(path, e)),
            }
        }
    }
}

#[cfg(not(unix))]
pub use self::fallback::PprofGuard;

#[cfg(not(unix))]
mod fallback {
    use super::{CpuProfileGuard, CpuProfiler, PprofProfiler};
    use crate::error::{ProfilingError, Result};
    use std::fs::File;
    use std::path::Path;

    /// No sampler exists on this platform
    pub enum PprofGuard {}

    impl CpuProfiler for PprofProfiler {
        type Guard = PprofGuard;

        fn start(&self, _path: &Path) -> Result<PprofGuard> {
            Err(ProfilingError::cpu_profiler(
                "CPU profiling is only supported on unix platforms",
            ))
        }
    }

    impl CpuProfileGuard for PprofGuard {
        fn stop_into(self, _output: &mut File, _path: &Path) -> Result<()> {
            match self {}
        }
    }
}

/// An open CPU profiling session
pub struct CpuSession<G: CpuProfileGuard> {
    active: Option<(G, File)>,
    path: PathBuf,
}

impl<G: CpuProfileGuard> CpuSession<G> {
    /// Start sampling into an already created profile file.
    ///
    /// # Errors
    ///
    /// Returns error if the profiler fails to start.
    pub fn begin<P>(profiler: &P, output: File, path: &Path) -> Result<Self>
    where
        P: CpuProfiler<Guard = G>,
    {
        let guard = profiler.start(path)?;
        debug!("CPU profiling started, writing to {}", path.display());

        Ok(Self {
            active: Some((guard, output)),
            path: path.to_path_buf(),
        })
    }

    /// Stop sampling and flush the profile.
    ///
    /// # Errors
    ///
    /// Returns error if the profile cannot be written or flushed.
    pub fn finish(mut self) -> Result<()> {
        self.stop()
    }

    /// Whether the sampler is still running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn stop(&mut self) -> Result<()> {
        let Some((guard, mut output)) = self.active.take() else {
            return Ok(());
        };

        guard.stop_into(&mut output, &self.path)?;
        output
            .sync_all()
            .map_err(|e| ProfilingError::profile_write_failed(&self.path, e))?;

        debug!("CPU profile flushed to {}", self.path.display());
        Ok(())
    }
}

impl<G: CpuProfileGuard> Drop for CpuSession<G> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to flush CPU profile {}: {e}", self.path.display());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FAKE_PROFILE, FakeCpuProfiler};
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ProfileFormat::for_path(Path::new("cpu.svg")),
            ProfileFormat::Flamegraph
        );
        assert_eq!(
            ProfileFormat::for_path(Path::new("CPU.SVG")),
            ProfileFormat::Flamegraph
        );
        assert_eq!(
            ProfileFormat::for_path(Path::new("/tmp/sitebench-cpuprofile")),
            ProfileFormat::Pprof
        );
    }

    #[test]
    fn test_finish_stops_once() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cpu.pb");
        let profiler = FakeCpuProfiler::default();

        let session = CpuSession::begin(&profiler, File::create(&path)?, &path)?;
        assert!(session.is_active());
        session.finish()?;

        assert_eq!(profiler.starts.get(), 1);
        assert_eq!(profiler.stops.get(), 1);
        assert_eq!(std::fs::read(&path)?, FAKE_PROFILE);
        Ok(())
    }

    #[test]
    fn test_drop_flushes_unfinished_session() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cpu.pb");
        let profiler = FakeCpuProfiler::default();

        {
            let _session = CpuSession::begin(&profiler, File::create(&path)?, &path)?;
        }

        assert_eq!(profiler.stops.get(), 1);
        assert_eq!(std::fs::read(&path)?, FAKE_PROFILE);
        Ok(())
    }

    #[test]
    fn test_sampler_skips_libc_and_unwinder_frames() {
        for lib in ["libc", "libgcc", "pthread", "vdso"] {
            assert!(SAMPLER_BLOCKLIST.contains(&lib), "{lib} must be blocklisted");
        }
    }

    #[test]
    fn test_pprof_profiler_keeps_frequency() {
        assert_eq!(PprofProfiler::new(250).frequency(), 250);
    }
}
