//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sitebench_profiling::{DEFAULT_BUILD_COUNT, DEFAULT_SAMPLING_FREQUENCY_HZ};

/// sitebench - static site build benchmarking
#[derive(Parser, Debug)]
#[command(name = "sitebench")]
#[command(version)]
#[command(about = "Benchmark a static site generator by building a site many times")]
pub struct Cli {
    /// Site source directory
    #[arg(short, long, global = true, default_value = ".")]
    pub source: PathBuf,

    /// Site configuration file (default: <source>/sitebench.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging when RUST_LOG is not set
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark the site generator by building the site a number of times
    #[command(
        long_about = "Builds the site many times over while profiling the running process.\n\n\
                      By default a CPU profile is written; passing --memprofile switches to a \
                      single heap snapshot taken after the last build."
    )]
    Benchmark {
        /// Path/filename for the CPU profile file
        #[arg(long, value_name = "PATH")]
        cpuprofile: Option<PathBuf>,

        /// Path/filename for the memory profile file
        #[arg(long, value_name = "PATH")]
        memprofile: Option<PathBuf>,

        /// Number of times to build the site
        #[arg(short = 'n', long, default_value_t = DEFAULT_BUILD_COUNT)]
        count: u32,

        /// CPU sampling frequency in Hz (1-10000)
        #[arg(long, value_name = "HZ", default_value_t = DEFAULT_SAMPLING_FREQUENCY_HZ)]
        frequency: u32,
    },
}
