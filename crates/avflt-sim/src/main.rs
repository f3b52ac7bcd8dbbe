//! Harness binary that drives [`avflt_core`] against a simulated filter
//! framework and synthetic agent threads.
//!
//! This stands in for the real kernel module and user-space scanner: it
//! wires a [`FakeFilterFramework`], a [`FakeHandleBroker`], and one or more
//! agent threads that reply according to a small scripted policy, then runs
//! the end-to-end scenarios a real deployment would exercise against a live
//! scanner.

mod scenario;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avflt-sim")]
#[command(author, version)]
#[command(about = "Simulated filter framework and agents for the avflt broker")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single named scenario from the spec's end-to-end scenario list.
    Scenario {
        /// One of: clean-open, cache-hit, infected, timeout, gate-closed, drain.
        name: String,
    },
    /// Run every scenario in sequence and report pass/fail for each.
    All,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Scenario { name } => run_one(&name),
        Commands::All => run_all(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_one(name: &str) -> anyhow::Result<()> {
    let outcome = scenario::run_named(name)?;
    println!("{name}: {outcome}");
    Ok(())
}

fn run_all() -> anyhow::Result<()> {
    let mut failures = 0;
    for name in scenario::ALL_SCENARIOS {
        match scenario::run_named(name) {
            Ok(outcome) => println!("{name}: {outcome}"),
            Err(e) => {
                failures += 1;
                println!("{name}: FAILED ({e:#})");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} scenario(s) failed");
    }
    Ok(())
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();
}
