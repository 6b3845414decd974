//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;

use anyhow::Result;
use sitebench_profiling::{BenchmarkConfig, BenchmarkRunner, BenchmarkSummary, initialize_config};
use tracing::debug;

use crate::cli::{Cli, Commands};

/// Execute a parsed command line.
pub fn execute_command(cli: Cli) -> Result<()> {
    let Cli {
        source,
        config,
        command,
        ..
    } = cli;

    match command {
        Commands::Benchmark {
            cpuprofile,
            memprofile,
            count,
            frequency,
        } => cmd_benchmark(
            &source,
            config.as_deref(),
            cpuprofile.as_deref(),
            memprofile.as_deref(),
            count,
            frequency,
        ),
    }
}

/// Build the site `count` times under the selected profiler.
fn cmd_benchmark(
    source: &Path,
    config_file: Option<&Path>,
    cpuprofile: Option<&Path>,
    memprofile: Option<&Path>,
    count: u32,
    frequency: u32,
) -> Result<()> {
    let site = initialize_config(source, config_file)?;
    debug!(
        "Site builder: {} {}",
        site.command(),
        site.args().join(" ")
    );

    let config = BenchmarkConfig::from_flags(count, cpuprofile, memprofile)
        .with_sampling_frequency(frequency)?;
    let mut build = site.command_build();

    let summary = BenchmarkRunner::new(config).run(&mut build)?;
    print_summary(&summary);

    Ok(())
}

fn print_summary(summary: &BenchmarkSummary) {
    println!("=== Benchmark Complete ===");
    println!("Builds: {}", summary.iterations());
    println!("Total time: {:.3}s", summary.elapsed().as_secs_f64());
    if let Some(mean) = summary.mean_build_time() {
        println!("Mean build time: {:.3}ms", mean.as_secs_f64() * 1000.0);
    }
    if let Some(children) = summary.children() {
        println!(
            "Builder CPU time: {:.3}s user, {:.3}s system",
            children.user_time().as_secs_f64(),
            children.system_time().as_secs_f64()
        );
        println!("Builder peak RSS: {:.1} MB", children.max_rss_mb());
    }
    println!(
        "{} profile saved to: {}",
        summary.mode().name(),
        summary.profile_path().display()
    );
}
