//! # sitebench
//!
//! Command-line entry point for the site build benchmark harness.
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `info`, or
//! `debug` with `--verbose`). The benchmark summary goes to stdout.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod cli;
mod commands;

use std::process;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match commands::execute_command(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
