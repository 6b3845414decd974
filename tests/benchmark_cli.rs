//! Integration tests for the `sitebench benchmark` command.
//!
//! These tests verify that:
//! - Profile files are written in the selected mode
//! - The site is built exactly `--count` times, failures included
//! - Configuration and profile-file errors fail the command before any build

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use sitebench_profiling::HeapSnapshot;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Site whose generator appends one line to `builds.log` per build.
fn counting_site(dir: &Path) -> std::io::Result<()> {
    std::fs::write(
        dir.join("sitebench.toml"),
        "[build]\ncommand = \"sh\"\nargs = [\"-c\", \"echo run >> builds.log\"]\n",
    )
}

fn build_count(dir: &Path) -> std::io::Result<usize> {
    match std::fs::read_to_string(dir.join("builds.log")) {
        Ok(log) => Ok(log.lines().count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

fn sitebench() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("sitebench")?;
    cmd.env("RUST_LOG", "warn");
    Ok(cmd)
}

#[test]
fn test_help_lists_benchmark_flags() -> TestResult {
    sitebench()?
        .args(["benchmark", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cpuprofile"))
        .stdout(predicate::str::contains("--memprofile"))
        .stdout(predicate::str::contains("--count"))
        .stdout(predicate::str::contains("--frequency"));
    Ok(())
}

#[test]
fn test_out_of_range_frequency_fails_before_building() -> TestResult {
    let dir = tempfile::tempdir()?;
    counting_site(dir.path())?;
    let profile = dir.path().join("cpu.pb");

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .args(["benchmark", "-n", "2", "--frequency", "0", "--cpuprofile"])
        .arg(&profile)
        .assert()
        .failure()
        .stderr(predicate::str::contains("sampling frequency"));

    assert_eq!(build_count(dir.path())?, 0);
    assert!(!profile.exists());
    Ok(())
}

#[test]
fn test_negative_count_is_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    counting_site(dir.path())?;

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .args(["benchmark", "-n", "-1"])
        .assert()
        .failure();

    assert_eq!(build_count(dir.path())?, 0);
    Ok(())
}

#[test]
fn test_missing_site_config_fails_before_building() -> TestResult {
    let dir = tempfile::tempdir()?;
    let profile = dir.path().join("mem.json");

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .args(["benchmark", "-n", "2", "--memprofile"])
        .arg(&profile)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read site configuration"));

    assert!(!profile.exists());
    Ok(())
}

#[test]
fn test_uncreatable_cpu_profile_fails_before_building() -> TestResult {
    let dir = tempfile::tempdir()?;
    counting_site(dir.path())?;

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .args(["benchmark", "-n", "3", "--cpuprofile"])
        .arg(dir.path().join("no-such-dir").join("cpu.pb"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to create profile file"));

    assert_eq!(build_count(dir.path())?, 0);
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_memory_profile_after_all_builds() -> TestResult {
    let dir = tempfile::tempdir()?;
    counting_site(dir.path())?;
    let profile = dir.path().join("mem.json");

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .args(["benchmark", "-n", "5", "--memprofile"])
        .arg(&profile)
        .assert()
        .success()
        .stdout(predicate::str::contains("Builds: 5"));

    assert_eq!(build_count(dir.path())?, 5);
    let snapshot = HeapSnapshot::read_from(&profile)?;
    assert_eq!(snapshot.iterations(), 5);
    assert!(snapshot.metrics().rss_kb() > 0);
    let children = snapshot.children().ok_or("snapshot is missing builder usage")?;
    assert!(children.max_rss_kb() > 0);
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_failing_builds_do_not_fail_benchmark() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("failing.toml");
    std::fs::write(&config, "[build]\ncommand = \"false\"\n")?;

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["benchmark", "-n", "3", "--memprofile"])
        .arg(dir.path().join("mem.json"))
        .assert()
        .success();
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_cpu_profile_written() -> TestResult {
    let dir = tempfile::tempdir()?;
    counting_site(dir.path())?;
    let profile = dir.path().join("cpu.pb");

    sitebench()?
        .arg("--source")
        .arg(dir.path())
        .args(["benchmark", "-n", "2", "--frequency", "250", "--cpuprofile"])
        .arg(&profile)
        .assert()
        .success()
        .stdout(predicate::str::contains("cpu profile saved to"))
        .stdout(predicate::str::contains("Builder CPU time"))
        .stdout(predicate::str::contains("Builder peak RSS"));

    assert_eq!(build_count(dir.path())?, 2);
    assert!(profile.exists());
    Ok(())
}
