//! Drives one workload through a real `AutoScaler`.
//!
//! Metrics reach the autoscaler through a live metrics channel and its
//! own accumulation task; the queue length is a shared gauge. Each step
//! writes the workload's messages, lets live replicas consume, asks for a
//! proposal, feeds it to the replica model and reports the resulting live
//! count back to the autoscaler.
//!
//! Must run on a current-thread runtime with a paused clock: each step
//! advances time by [`TICK`], and the accumulation task only gets to
//! drain the step's metrics while the driver is yielding.

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use fngrid_autoscale::{AutoScaler, FunctionId, ScalingConfig};
use fngrid_transport::{ConsumerAggregateMetric, QueueGauge, metrics_channel};

use crate::replica_model::ReplicaModel;
use crate::workload::Workload;

/// Simulated time per step.
pub const TICK: Duration = Duration::from_millis(100);

/// Messages each live replica reads per step.
pub const READS_PER_REPLICA: usize = 10;

/// Ceiling used when the configuration declares none.
pub const DEFAULT_MAX_REPLICAS: usize = 1_000_000;

const TOPIC: &str = "topic";
const FUNCTION: &str = "stub-function";
const POD: &str = "stub-pod";

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub steps: usize,
    pub max_writes_per_tick: usize,
    pub init_delay: usize,
    pub pull_delay: usize,
    pub config: ScalingConfig,
}

/// State after one simulated step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub replicas: usize,
    pub queue: i64,
    pub writes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub peak_replicas: usize,
    pub peak_queue: i64,
    pub final_queue: i64,
}

impl Summary {
    pub fn of(records: &[StepRecord]) -> Self {
        Self {
            peak_replicas: records.iter().map(|r| r.replicas).max().unwrap_or(0),
            peak_queue: records.iter().map(|r| r.queue).max().unwrap_or(0),
            final_queue: records.last().map_or(0, |r| r.queue),
        }
    }
}

pub async fn simulate(
    workload: Workload,
    options: &SimulationOptions,
) -> anyhow::Result<Vec<StepRecord>> {
    let (sender, streams) = metrics_channel();
    let queue = QueueGauge::default();
    let scaler = AutoScaler::new(streams, queue.clone());

    let mut config = options.config.clone();
    if config.scaler.max_replicas.is_none() {
        config.scaler.max_replicas = Some(DEFAULT_MAX_REPLICAS);
    }
    config.apply(&scaler);

    let function = FunctionId::new(FUNCTION);
    scaler.run()?;
    scaler.start_monitoring(TOPIC, &function)?;

    info!(workload = workload.name(), steps = options.steps, "simulation started");

    let mut model = ReplicaModel::new(options.init_delay, options.pull_delay);
    let mut records = Vec::with_capacity(options.steps);

    for step in 0..options.steps {
        let writes = workload.writes(step, options.max_writes_per_tick);
        if writes > 0 {
            sender
                .produced(TOPIC, u32::try_from(writes).context("writes per tick overflow")?)?;
            queue.add(writes as i64);
        }

        let capacity = (model.actual() * READS_PER_REPLICA) as i64;
        let reads = capacity.min(queue.get());
        if reads > 0 {
            let metric = ConsumerAggregateMetric::new(TOPIC, FUNCTION, reads as u32)
                .with_pod(POD, TICK);
            sender.send_consumer(metric)?;
            queue.sub(reads);
        }

        tokio::time::advance(TICK).await;
        tokio::task::yield_now().await;

        let desired = scaler.propose().get(&function).copied().unwrap_or(0);
        model.desire(desired);
        model.tick();
        let replicas = model.actual();
        scaler.inform_function_replicas(&function, replicas);

        if step % 1000 == 0 {
            debug!(
                step,
                desired,
                replicas,
                pending = model.pending(),
                queue = queue.get(),
                "simulation progress"
            );
        }

        records.push(StepRecord {
            step,
            replicas,
            queue: queue.get(),
            writes,
        });
    }

    scaler.close().await?;
    Ok(records)
}
