use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use tracing::info;

use fngrid_autoscale::ScalingConfig;

use crate::simulation::{self, SimulationOptions, StepRecord, Summary};
use crate::workload::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Whitespace-separated `step replicas queue writes` lines.
    Dat,
    /// One JSON object per line.
    Json,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Dat => "dat",
            OutputFormat::Json => "jsonl",
        }
    }
}

pub struct RunArgs {
    /// `None` runs every workload.
    pub workload: Option<Workload>,
    pub out_dir: PathBuf,
    pub format: OutputFormat,
    pub config: Option<PathBuf>,
    pub steps: usize,
    pub max_writes_per_tick: usize,
    pub init_delay: usize,
    pub pull_delay: usize,
    pub max_replicas: Option<usize>,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match args.config {
        Some(ref path) => ScalingConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScalingConfig::default(),
    };
    if args.max_replicas.is_some() {
        config.scaler.max_replicas = args.max_replicas;
        config.validate().context("applying --max-replicas")?;
    }

    let options = SimulationOptions {
        steps: args.steps,
        max_writes_per_tick: args.max_writes_per_tick,
        init_delay: args.init_delay,
        pull_delay: args.pull_delay,
        config,
    };

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let workloads = match args.workload {
        Some(w) => vec![w],
        None => Workload::ALL.to_vec(),
    };

    for workload in workloads {
        let path = run_scenario(workload, &options, &args.out_dir, args.format)?;
        println!("✓ {} scenario written to {}", workload.name(), path.display());
    }

    Ok(())
}

/// Simulate one workload on its own paused-clock runtime and write its
/// records under `out_dir`.
pub fn run_scenario(
    workload: Workload,
    options: &SimulationOptions,
    out_dir: &Path,
    format: OutputFormat,
) -> anyhow::Result<PathBuf> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()?;
    let records = runtime.block_on(simulation::simulate(workload, options))?;

    let path = out_dir.join(format!(
        "{}-scenario.{}",
        workload.name(),
        format.extension()
    ));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    write_records(BufWriter::new(file), &records, format)?;

    let summary = Summary::of(&records);
    info!(
        workload = workload.name(),
        steps = records.len(),
        peak_replicas = summary.peak_replicas,
        peak_queue = summary.peak_queue,
        final_queue = summary.final_queue,
        "simulation completed"
    );

    Ok(path)
}

fn write_records(
    mut out: impl Write,
    records: &[StepRecord],
    format: OutputFormat,
) -> anyhow::Result<()> {
    for record in records {
        match format {
            OutputFormat::Dat => writeln!(
                out,
                "{} {} {} {}",
                record.step, record.replicas, record.queue, record.writes
            )?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut out, record)?;
                writeln!(out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
