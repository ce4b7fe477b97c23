//! fngrid-sim — drives synthetic workloads through the autoscaler.
//!
//! Each simulation step stands for 100ms. Every step the workload writes
//! messages to a topic, live replicas read up to 10 messages each, the
//! autoscaler proposes a replica count and a start-up delay model decides
//! how many replicas are actually live.
//!
//! # Usage
//!
//! ```text
//! fngrid-sim run --workload step --steps 10000 --out-dir ./sim
//! fngrid-sim run --config scaling.toml --format json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::commands::run::{OutputFormat, RunArgs};
use crate::workload::{DEFAULT_MAX_WRITES_PER_TICK, Workload};

mod commands;
mod replica_model;
mod simulation;
mod workload;

#[derive(Parser)]
#[command(
    name = "fngrid-sim",
    about = "fngrid autoscaler simulator",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workload, or all of them, and write one data file each.
    Run {
        /// Workload to simulate: step, sine, ramp, combined or all.
        #[arg(short, long, default_value = "all", value_parser = parse_workload)]
        workload: Selection,

        /// Number of 100ms steps to simulate.
        #[arg(long, default_value = "10000")]
        steps: usize,

        /// Directory for the `<workload>-scenario` files.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(short, long, value_enum, default_value = "dat")]
        format: OutputFormat,

        /// Scaling configuration (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Steps before a new replica is live.
        #[arg(long, default_value = "15")]
        init_delay: usize,

        /// Extra steps for the very first replica start.
        #[arg(long, default_value = "0")]
        pull_delay: usize,

        /// Heaviest workload, in messages per step.
        #[arg(long, default_value_t = DEFAULT_MAX_WRITES_PER_TICK)]
        max_writes: usize,

        /// Replica ceiling, overriding the configuration.
        #[arg(long)]
        max_replicas: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    All,
    One(Workload),
}

fn parse_workload(s: &str) -> Result<Selection, String> {
    if s.eq_ignore_ascii_case("all") {
        return Ok(Selection::All);
    }
    Workload::from_str(s, true).map(Selection::One)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fngrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            steps,
            out_dir,
            format,
            config,
            init_delay,
            pull_delay,
            max_writes,
            max_replicas,
        } => commands::run::run(RunArgs {
            workload: match workload {
                Selection::All => None,
                Selection::One(w) => Some(w),
            },
            out_dir,
            format,
            config,
            steps,
            max_writes_per_tick: max_writes,
            init_delay,
            pull_delay,
            max_replicas,
        }),
    }
}
