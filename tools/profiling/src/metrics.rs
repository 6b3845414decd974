#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Heap snapshots taken after the build loop
//!
//! The harness reads its own memory from `/proc/self/status`. Builders that
//! run as child processes are covered separately by [`ChildUsage`], read with
//! `getrusage(RUSAGE_CHILDREN)` once the children have been reaped.

use crate::error::{ProfilingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

/// Source of point-in-time memory and resource readings
pub trait HeapProbe {
    /// Read the current memory state of this process.
    ///
    /// # Errors
    ///
    /// Returns error if the memory state cannot be read.
    fn snapshot(&self) -> Result<MemoryMetrics>;

    /// Read the cumulative resource usage of reaped child processes.
    ///
    /// # Errors
    ///
    /// Returns error if the usage cannot be read on this platform.
    fn child_usage(&self) -> Result<ChildUsage>;
}

/// Reads memory state from `/proc/self/status`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatusProbe;

impl HeapProbe for ProcStatusProbe {
    fn snapshot(&self) -> Result<MemoryMetrics> {
        MemoryMetrics::read_from_proc(std::process::id())
    }

    fn child_usage(&self) -> Result<ChildUsage> {
        ChildUsage::current()
    }
}

/// Resource usage of terminated child processes
///
/// CPU times accumulate over every reaped child, so a loop's share is the
/// difference of two readings (see [`ChildUsage::since`]). `max_rss_kb` is the
/// largest resident set of any single child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildUsage {
    /// Peak resident set of the largest child, in kilobytes
    max_rss_kb: u64,

    /// User CPU time in microseconds
    user_time_us: u64,

    /// System CPU time in microseconds
    system_time_us: u64,
}

impl ChildUsage {
    /// Create a child usage reading
    #[must_use]
    pub const fn new(max_rss_kb: u64, user_time_us: u64, system_time_us: u64) -> Self {
        Self {
            max_rss_kb,
            user_time_us,
            system_time_us,
        }
    }

    /// Read the usage of all children reaped so far
    ///
    /// # Errors
    ///
    /// Returns error if `getrusage` fails
    #[cfg(unix)]
    pub fn current() -> Result<Self> {
        use nix::sys::resource::{UsageWho, getrusage};

        let usage = getrusage(UsageWho::RUSAGE_CHILDREN).map_err(|e| {
            ProfilingError::MetricsReadFailed(std::process::id(), format!("getrusage failed: {e}"))
        })?;

        let max_rss = u64::try_from(usage.max_rss()).unwrap_or(0);
        // macOS reports bytes, everyone else kilobytes
        #[cfg(target_os = "macos")]
        let max_rss = max_rss / 1024;

        Ok(Self::new(
            max_rss,
            timeval_micros(usage.user_time()),
            timeval_micros(usage.system_time()),
        ))
    }

    /// Child usage is not available on this platform
    ///
    /// # Errors
    ///
    /// Always returns `MetricsReadFailed`
    #[cfg(not(unix))]
    pub fn current() -> Result<Self> {
        Err(ProfilingError::MetricsReadFailed(
            std::process::id(),
            "child resource usage requires getrusage".to_string(),
        ))
    }

    /// Usage accrued since an earlier reading
    ///
    /// CPU times are subtracted; the peak RSS is kept from `self`.
    #[must_use]
    pub const fn since(&self, earlier: &Self) -> Self {
        Self {
            max_rss_kb: self.max_rss_kb,
            user_time_us: self.user_time_us.saturating_sub(earlier.user_time_us),
            system_time_us: self.system_time_us.saturating_sub(earlier.system_time_us),
        }
    }

    /// Get the peak child RSS in kilobytes
    #[must_use]
    pub const fn max_rss_kb(&self) -> u64 {
        self.max_rss_kb
    }

    /// Get the peak child RSS in megabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Acceptable precision loss for display purposes
    pub const fn max_rss_mb(&self) -> f64 {
        self.max_rss_kb as f64 / 1024.0
    }

    /// Get the user CPU time
    #[must_use]
    pub const fn user_time(&self) -> Duration {
        Duration::from_micros(self.user_time_us)
    }

    /// Get the system CPU time
    #[must_use]
    pub const fn system_time(&self) -> Duration {
        Duration::from_micros(self.system_time_us)
    }
}

#[cfg(unix)]
fn timeval_micros(tv: nix::sys::time::TimeVal) -> u64 {
    let secs = u64::try_from(tv.tv_sec()).unwrap_or(0);
    let micros = u64::try_from(tv.tv_usec()).unwrap_or(0);
    secs.saturating_mul(1_000_000).saturating_add(micros)
}

/// The single artifact written in memory-profiling mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapSnapshot {
    /// Timestamp when the snapshot was taken
    timestamp: DateTime<Utc>,

    /// Process ID of the harness
    pid: u32,

    /// Builds completed before the snapshot
    iterations: u32,

    /// Time spent in the build loop (milliseconds)
    elapsed_ms: u64,

    /// Memory metrics of the harness process
    metrics: MemoryMetrics,

    /// Resource usage of builder child processes during the loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<ChildUsage>,
}

impl HeapSnapshot {
    /// Create a new heap snapshot
    #[must_use]
    pub fn new(metrics: MemoryMetrics, iterations: u32, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            pid: std::process::id(),
            iterations,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            metrics,
            children: None,
        }
    }

    /// Attach the builder children's usage over the loop
    #[must_use]
    pub fn with_children(mut self, children: Option<ChildUsage>) -> Self {
        self.children = children;
        self
    }

    /// Get the timestamp
    #[must_use]
    pub const fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    /// Get the process ID
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the number of builds before the snapshot
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Get the loop duration in milliseconds
    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Get the memory metrics
    #[must_use]
    pub const fn metrics(&self) -> &MemoryMetrics {
        &self.metrics
    }

    /// Get the builder children's usage, if it could be read
    #[must_use]
    pub const fn children(&self) -> Option<&ChildUsage> {
        self.children.as_ref()
    }

    /// Write the snapshot as JSON and flush it to disk
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn write_to(&self, file: &mut File, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        writeln!(file, "{json}").map_err(|e| ProfilingError::profile_write_failed(path, e))?;
        file.sync_all()
            .map_err(|e| ProfilingError::profile_write_failed(path, e))
    }

    /// Read a snapshot back from a profile file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not hold a snapshot
    pub fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ProfilingError::ProfileReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(Into::into)
    }
}

/// Metric field types from /proc status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricType {
    VmRss,
    VmSize,
    VmPeak,
    RssAnon,
}

/// Memory metrics from `/proc/[pid]/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size (RSS) in kilobytes
    rss: u64,

    /// Virtual Memory Size (`VmSize`) in kilobytes
    vm_size: u64,

    /// Peak virtual memory in kilobytes
    vm_peak: u64,

    /// Anonymous (heap) resident memory in kilobytes
    rss_anon: u64,
}

impl MemoryMetrics {
    /// Create new memory metrics
    #[must_use]
    pub const fn new(rss: u64, vm_size: u64, vm_peak: u64, rss_anon: u64) -> Self {
        Self {
            rss,
            vm_size,
            vm_peak,
            rss_anon,
        }
    }

    /// Get RSS in kilobytes
    #[must_use]
    pub const fn rss_kb(&self) -> u64 {
        self.rss
    }

    /// Get RSS in megabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Acceptable precision loss for display purposes
    pub const fn rss_mb(&self) -> f64 {
        self.rss as f64 / 1024.0
    }

    /// Get virtual memory size in kilobytes
    #[must_use]
    pub const fn vm_size_kb(&self) -> u64 {
        self.vm_size
    }

    /// Get peak virtual memory in kilobytes
    #[must_use]
    pub const fn vm_peak_kb(&self) -> u64 {
        self.vm_peak
    }

    /// Get anonymous resident memory in kilobytes
    #[must_use]
    pub const fn rss_anon_kb(&self) -> u64 {
        self.rss_anon
    }

    /// Read memory metrics from `/proc/[pid]/status`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `/proc/[pid]/status` cannot be read (including non-Linux hosts)
    /// - Required fields are missing
    /// - Values cannot be parsed
    pub fn read_from_proc(pid: u32) -> Result<Self> {
        let status_path = format!("/proc/{pid}/status");
        Self::read_from_file(Path::new(&status_path), pid)
    }

    fn read_from_file(path: &Path, pid: u32) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| ProfilingError::MetricsReadFailed(pid, format!("failed to open: {e}")))?;

        #[derive(Debug, Default)]
        struct MetricsAccumulator {
            rss_kb: Option<u64>,
            vm_size_kb: Option<u64>,
            vm_peak_kb: Option<u64>,
            rss_anon_kb: Option<u64>,
        }

        let accumulator = BufReader::new(file)
            .lines()
            .map(|line_result| {
                line_result.map_err(|e| {
                    ProfilingError::MetricsReadFailed(pid, format!("failed to read line: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter_map(|line| Self::parse_proc_line(&line).transpose())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .fold(
                MetricsAccumulator::default(),
                |mut acc, (metric_type, value)| {
                    match metric_type {
                        MetricType::VmRss => acc.rss_kb = Some(value),
                        MetricType::VmSize => acc.vm_size_kb = Some(value),
                        MetricType::VmPeak => acc.vm_peak_kb = Some(value),
                        MetricType::RssAnon => acc.rss_anon_kb = Some(value),
                    }
                    acc
                },
            );

        let rss_kb = accumulator
            .rss_kb
            .ok_or_else(|| ProfilingError::MetricsReadFailed(pid, "VmRSS not found".to_string()))?;

        let vm_size_kb = accumulator.vm_size_kb.ok_or_else(|| {
            ProfilingError::MetricsReadFailed(pid, "VmSize not found".to_string())
        })?;

        let vm_peak_kb = accumulator.vm_peak_kb.ok_or_else(|| {
            ProfilingError::MetricsReadFailed(pid, "VmPeak not found".to_string())
        })?;

        // Older kernels lack RssAnon
        let rss_anon_kb = accumulator.rss_anon_kb.unwrap_or(0);

        Ok(Self::new(rss_kb, vm_size_kb, vm_peak_kb, rss_anon_kb))
    }

    /// Parse a single /proc status line ("`FieldName`:    12345 kB")
    ///
    /// Returns None for fields we do not track
    fn parse_proc_line(line: &str) -> Result<Option<(MetricType, u64)>> {
        let Some((name, rest)) = line.split_once(':') else {
            return Ok(None);
        };

        let metric_type = match name {
            "VmRSS" => MetricType::VmRss,
            "VmSize" => MetricType::VmSize,
            "VmPeak" => MetricType::VmPeak,
            "RssAnon" => MetricType::RssAnon,
            _ => return Ok(None),
        };

        let value = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| {
                ProfilingError::MetricsParseError(format!("missing value in line: {line}"))
            })?
            .parse::<u64>()
            .map_err(|e| {
                ProfilingError::MetricsParseError(format!("failed to parse value in '{line}': {e}"))
            })?;

        Ok(Some((metric_type, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_memory_metrics_rss_mb() {
        let metrics = MemoryMetrics::new(2048, 4096, 5120, 1024);
        assert!((metrics.rss_mb() - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_proc_status() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            "Name:\tsitebench\nVmPeak:\t   3072 kB\nVmSize:\t   2048 kB\nVmRSS:\t   1024 kB\nRssAnon:\t   512 kB\n"
        )?;
        file.flush()?;

        let metrics = MemoryMetrics::read_from_file(file.path(), 1234)?;
        assert_eq!(metrics.rss_kb(), 1024);
        assert_eq!(metrics.vm_size_kb(), 2048);
        assert_eq!(metrics.vm_peak_kb(), 3072);
        assert_eq!(metrics.rss_anon_kb(), 512);
        Ok(())
    }

    #[test]
    fn test_missing_rss_anon_defaults_to_zero() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let mut file = NamedTempFile::new()?;
        write!(file, "VmPeak:\t 30 kB\nVmSize:\t 20 kB\nVmRSS:\t 10 kB\n")?;
        file.flush()?;

        let metrics = MemoryMetrics::read_from_file(file.path(), 1)?;
        assert_eq!(metrics.rss_anon_kb(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_rss_is_an_error() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut file = NamedTempFile::new()?;
        write!(file, "VmPeak:\t 30 kB\nVmSize:\t 20 kB\n")?;
        file.flush()?;

        let result = MemoryMetrics::read_from_file(file.path(), 1);
        assert!(matches!(result, Err(ProfilingError::MetricsReadFailed(1, _))));
        Ok(())
    }

    #[test]
    fn test_garbage_value_is_a_parse_error() {
        let result = MemoryMetrics::parse_proc_line("VmRSS:\t lots kB");
        assert!(matches!(result, Err(ProfilingError::MetricsParseError(_))));
    }

    #[test]
    fn test_untracked_fields_are_skipped() {
        assert!(matches!(MemoryMetrics::parse_proc_line("VmRSSX: 1 kB"), Ok(None)));
        assert!(matches!(MemoryMetrics::parse_proc_line("Threads:\t4"), Ok(None)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_probe_reads_self() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let metrics = ProcStatusProbe.snapshot()?;
        assert!(metrics.rss_kb() > 0);
        Ok(())
    }

    #[test]
    fn test_child_usage_since_subtracts_cpu_time() {
        let before = ChildUsage::new(10_000, 2_000_000, 300_000);
        let after = ChildUsage::new(70_000, 5_500_000, 400_000);

        let during = after.since(&before);
        assert_eq!(during.max_rss_kb(), 70_000);
        assert_eq!(during.user_time(), Duration::from_millis(3500));
        assert_eq!(during.system_time(), Duration::from_millis(100));

        // A reading taken out of order never underflows
        assert_eq!(before.since(&after).user_time(), Duration::ZERO);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_child_usage_sees_reaped_child() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let status = std::process::Command::new("true").status()?;
        assert!(status.success());

        let usage = ProcStatusProbe.child_usage()?;
        assert!(usage.max_rss_kb() > 0);
        Ok(())
    }

    #[test]
    fn test_snapshot_file_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mem.json");
        let mut file = File::create(&path)?;

        let snapshot = HeapSnapshot::new(
            MemoryMetrics::new(1024, 2048, 3072, 512),
            5,
            Duration::from_millis(250),
        )
        .with_children(Some(ChildUsage::new(65_536, 1_200_000, 80_000)));
        snapshot.write_to(&mut file, &path)?;

        let read_back = HeapSnapshot::read_from(&path)?;
        assert_eq!(read_back, snapshot);
        assert_eq!(read_back.iterations(), 5);
        assert_eq!(read_back.elapsed_ms(), 250);
        assert_eq!(read_back.children().map(ChildUsage::max_rss_kb), Some(65_536));
        Ok(())
    }
}
