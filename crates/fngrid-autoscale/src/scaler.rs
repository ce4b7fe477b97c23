//! Proposes replica counts for monitored functions.
//!
//! A background task drains the producer and consumer metric streams into
//! per-(topic, function) counters. Each call to [`AutoScaler::propose`]
//! turns those counters into a rate-matched replica estimate, resets them,
//! smooths the estimate through the function's [`Proposal`], and finally
//! refuses to propose zero replicas while work may still be queued.
//!
//! All state sits behind one mutex which every public method holds for
//! its full duration. The accumulation task only takes it between
//! receives, never while waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fngrid_transport::{
    ConsumerAggregateMetric, Inspector, MetricsReceiver, MetricsStreams, ProducerAggregateMetric,
};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::function::FunctionId;
use crate::proposal::Proposal;

/// Maximum replicas for a (topic, function name) pair.
pub type MaxReplicasPolicy = Arc<dyn Fn(&str, &str) -> usize + Send + Sync>;

/// How long to wait before scaling a function (by name) down to zero.
pub type DelayScaleDownPolicy = Arc<dyn Fn(&str) -> Duration + Send + Sync>;

/// Messages sent to a topic and received by one function since the last
/// proposal was calculated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct MetricsTotals {
    transmit_count: u32,
    receive_count: u32,
}

/// Outcome of checking a function's input queues.
#[derive(Debug)]
enum Backlog {
    Empty,
    Queued { topic: String, length: i64 },
    Unknown { topic: String },
}

struct Policies {
    max_replicas: RwLock<MaxReplicasPolicy>,
    delay_scale_down: RwLock<DelayScaleDownPolicy>,
}

impl Policies {
    fn max_replicas(&self) -> MaxReplicasPolicy {
        self.max_replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn delay_scale_down(&self) -> DelayScaleDownPolicy {
        self.delay_scale_down
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Default)]
struct ScalerState {
    /// topic → function → totals. Presence means "monitored".
    totals: HashMap<String, HashMap<FunctionId, MetricsTotals>>,
    /// One per monitored function.
    proposals: HashMap<FunctionId, Proposal>,
    /// Last reported actual replicas, monitored or not. Never pruned.
    replicas: HashMap<FunctionId, usize>,
}

impl ScalerState {
    fn record_producer(&mut self, pm: &ProducerAggregateMetric) {
        if let Some(functions) = self.totals.get_mut(&pm.topic) {
            for mt in functions.values_mut() {
                mt.transmit_count = mt.transmit_count.saturating_add(pm.count);
            }
        }
    }

    fn record_consumer(&mut self, cm: &ConsumerAggregateMetric) {
        if let Some(mt) = self
            .totals
            .get_mut(&cm.topic)
            .and_then(|functions| functions.get_mut(&FunctionId::new(cm.function.as_str())))
        {
            mt.receive_count = mt.receive_count.saturating_add(cm.count);
        }
    }

    fn actual_replicas(&self, function: &FunctionId) -> usize {
        self.replicas.get(function).copied().unwrap_or(0)
    }

    /// Feed each monitored function's rate estimate into its proposal and
    /// start a new accumulation window.
    fn calculate_proposals(&mut self, max_replicas: &MaxReplicasPolicy) {
        let mut desired: HashMap<FunctionId, usize> = HashMap::new();

        for (topic, functions) in self.totals.iter_mut() {
            for (function, mt) in functions.iter_mut() {
                let current = self.replicas.get(function).copied().unwrap_or(0);
                let mut proposed = rate_replicas(current, *mt);

                let max = max_replicas(topic, function.name());
                if proposed > max {
                    if proposed != current {
                        info!(
                            %function,
                            %topic,
                            max_replicas = max,
                            proposed,
                            "capping proposal at max replicas"
                        );
                    }
                    proposed = max;
                }

                *mt = MetricsTotals::default();

                desired
                    .entry(function.clone())
                    .and_modify(|d| *d = (*d).max(proposed))
                    .or_insert(proposed);
            }
        }

        for (function, proposed) in desired {
            if let Some(proposal) = self.proposals.get_mut(&function) {
                proposal.propose(proposed);
            }
        }
    }

    fn backlog(&self, function: &FunctionId, inspector: &dyn Inspector) -> Backlog {
        let mut topics: Vec<&String> = self
            .totals
            .iter()
            .filter(|(_, functions)| functions.contains_key(function))
            .map(|(topic, _)| topic)
            .collect();
        topics.sort();

        for topic in topics {
            match inspector.queue_length(topic, function.name()) {
                Ok(length) if length > 0 => {
                    return Backlog::Queued {
                        topic: topic.clone(),
                        length,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        %function,
                        %topic,
                        error = %e,
                        "failed to obtain queue length, assuming it is positive"
                    );
                    return Backlog::Unknown {
                        topic: topic.clone(),
                    };
                }
            }
        }
        Backlog::Empty
    }
}

/// Proportional estimate of the replicas needed for consumption to keep
/// up with production.
fn rate_replicas(current: usize, totals: MetricsTotals) -> usize {
    if totals.receive_count == 0 {
        // Nothing consumed yet: one replica gets things moving.
        return if totals.transmit_count == 0 { 0 } else { 1 };
    }
    let estimate =
        current as u128 * u128::from(totals.transmit_count) / u128::from(totals.receive_count);
    usize::try_from(estimate).unwrap_or(usize::MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the running accumulation task.
struct Accumulator {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Decides how many replicas each monitored function should run.
pub struct AutoScaler {
    state: Arc<Mutex<ScalerState>>,
    policies: Arc<Policies>,
    inspector: Box<dyn Inspector>,
    /// Taken by `run()`.
    receiver: Mutex<Option<Box<dyn MetricsReceiver>>>,
    accumulator: Mutex<Option<Accumulator>>,
}

impl AutoScaler {
    /// Create an autoscaler reading metrics from `receiver` and checking
    /// queue lengths with `inspector`.
    ///
    /// Defaults: no replica ceiling, no scale-down delay.
    pub fn new(receiver: impl MetricsReceiver, inspector: impl Inspector + 'static) -> Self {
        let max_replicas: MaxReplicasPolicy = Arc::new(|_, _| usize::MAX);
        let delay_scale_down: DelayScaleDownPolicy = Arc::new(|_| Duration::ZERO);
        Self {
            state: Arc::new(Mutex::new(ScalerState::default())),
            policies: Arc::new(Policies {
                max_replicas: RwLock::new(max_replicas),
                delay_scale_down: RwLock::new(delay_scale_down),
            }),
            inspector: Box::new(inspector),
            receiver: Mutex::new(Some(Box::new(receiver))),
            accumulator: Mutex::new(None),
        }
    }

    /// Set the maximum replica count policy, consulted on every proposal.
    pub fn set_max_replicas_policy(
        &self,
        policy: impl Fn(&str, &str) -> usize + Send + Sync + 'static,
    ) {
        *self
            .policies
            .max_replicas
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    /// Set the scale-down delay policy, consulted whenever a function's
    /// proposal starts dropping to zero.
    pub fn set_delay_scale_down_policy(
        &self,
        policy: impl Fn(&str) -> Duration + Send + Sync + 'static,
    ) {
        *self
            .policies
            .delay_scale_down
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    /// Start draining the metric streams on the current Tokio runtime.
    ///
    /// Returns immediately. Can only be called once.
    pub fn run(&self) -> AutoscaleResult<()> {
        let runtime = Handle::try_current().map_err(|_| AutoscaleError::NoRuntime)?;

        let mut accumulator = lock(&self.accumulator);
        let receiver = lock(&self.receiver)
            .take()
            .ok_or(AutoscaleError::AlreadyStarted)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state.clone();
        let handle = runtime.spawn(accumulate(state, receiver.into_streams(), shutdown_rx));

        *accumulator = Some(Accumulator {
            shutdown_tx,
            handle,
        });
        info!("autoscaler started");
        Ok(())
    }

    /// Stop the accumulation task and wait for it to exit.
    pub async fn close(&self) -> AutoscaleResult<()> {
        let accumulator = lock(&self.accumulator)
            .take()
            .ok_or(AutoscaleError::NotRunning)?;

        let _ = accumulator.shutdown_tx.send(true);
        accumulator
            .handle
            .await
            .map_err(|e| AutoscaleError::TaskFailed(e.to_string()))?;

        info!("autoscaler stopped");
        Ok(())
    }

    /// Record the number of replicas actually running for `function`,
    /// whether or not it is monitored.
    pub fn inform_function_replicas(&self, function: &FunctionId, replicas: usize) {
        let mut state = lock(&self.state);
        if state.replicas.insert(function.clone(), replicas) != Some(replicas) {
            debug!(%function, replicas, "actual replicas updated");
        }
    }

    /// Begin tracking metrics for `function` on `topic`.
    pub fn start_monitoring(&self, topic: &str, function: &FunctionId) -> AutoscaleResult<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let functions = state.totals.entry(topic.to_string()).or_default();
        if functions.contains_key(function) {
            return Err(AutoscaleError::AlreadyMonitoring {
                topic: topic.to_string(),
                function: function.clone(),
            });
        }
        functions.insert(function.clone(), MetricsTotals::default());

        if !state.proposals.contains_key(function) {
            state
                .proposals
                .insert(function.clone(), self.new_proposal(function));
        }

        info!(%topic, %function, "monitoring started");
        Ok(())
    }

    /// Stop tracking metrics for `function` on `topic`.
    ///
    /// The function's proposal is discarded once it is no longer monitored
    /// on any topic.
    pub fn stop_monitoring(&self, topic: &str, function: &FunctionId) -> AutoscaleResult<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let not_monitoring = || AutoscaleError::NotMonitoring {
            topic: topic.to_string(),
            function: function.clone(),
        };

        let functions = state.totals.get_mut(topic).ok_or_else(not_monitoring)?;
        functions.remove(function).ok_or_else(not_monitoring)?;

        if functions.is_empty() {
            state.totals.remove(topic);
        }

        if !state
            .totals
            .values()
            .any(|functions| functions.contains_key(function))
        {
            state.proposals.remove(function);
        }

        info!(%topic, %function, "monitoring stopped");
        Ok(())
    }

    /// Add a batch of produced messages to every function monitoring the
    /// metric's topic.
    pub fn record_producer_metric(&self, pm: &ProducerAggregateMetric) {
        lock(&self.state).record_producer(pm);
    }

    /// Add a batch of consumed messages to the consuming function.
    pub fn record_consumer_metric(&self, cm: &ConsumerAggregateMetric) {
        lock(&self.state).record_consumer(cm);
    }

    /// Propose replica counts for every monitored function.
    ///
    /// Consumes the metrics accumulated since the previous call. The
    /// returned map is a copy the caller may modify freely.
    pub fn propose(&self) -> HashMap<FunctionId, usize> {
        let mut state = lock(&self.state);
        state.calculate_proposals(&self.policies.max_replicas());

        let mut proposals = HashMap::with_capacity(state.proposals.len());
        for (function, proposal) in &state.proposals {
            let mut replicas = proposal.get();

            // The queue may only hold a function at one replica, never
            // start it from zero: that is the rate calculation's job.
            if replicas == 0 && state.actual_replicas(function) != 0 {
                match state.backlog(function, self.inspector.as_ref()) {
                    Backlog::Empty => {}
                    Backlog::Queued { topic, length } => {
                        info!(
                            %function,
                            %topic,
                            queue_length = length,
                            "ignoring proposal to scale to 0 replicas, work is queued"
                        );
                        replicas = 1;
                    }
                    Backlog::Unknown { topic } => {
                        info!(
                            %function,
                            %topic,
                            "ignoring proposal to scale to 0 replicas, queue length unknown"
                        );
                        replicas = 1;
                    }
                }
            }

            proposals.insert(function.clone(), replicas);
        }

        debug!(functions = proposals.len(), "replica proposals calculated");
        proposals
    }

    /// Monitored (topic, function) pairs, sorted.
    pub fn monitored(&self) -> Vec<(String, FunctionId)> {
        let state = lock(&self.state);
        let mut pairs: Vec<(String, FunctionId)> = state
            .totals
            .iter()
            .flat_map(|(topic, functions)| {
                functions
                    .keys()
                    .map(move |function| (topic.clone(), function.clone()))
            })
            .collect();
        pairs.sort();
        pairs
    }

    pub fn is_monitoring(&self, topic: &str, function: &FunctionId) -> bool {
        lock(&self.state)
            .totals
            .get(topic)
            .is_some_and(|functions| functions.contains_key(function))
    }

    /// Last replica count reported through `inform_function_replicas`.
    pub fn replicas(&self, function: &FunctionId) -> Option<usize> {
        lock(&self.state).replicas.get(function).copied()
    }

    fn new_proposal(&self, function: &FunctionId) -> Proposal {
        let policies = self.policies.clone();
        let name = function.function.clone();
        Proposal::new(move || {
            let delay = (policies.delay_scale_down())(&name);
            debug!(function = %name, ?delay, "delaying scale down to 0");
            delay
        })
    }
}

/// Drain both metric streams into `state` until shutdown is signalled.
///
/// A closed stream stops being polled; the other keeps flowing.
async fn accumulate(
    state: Arc<Mutex<ScalerState>>,
    streams: MetricsStreams,
    mut shutdown: watch::Receiver<bool>,
) {
    let MetricsStreams {
        mut producer,
        mut consumer,
    } = streams;
    let mut producer_open = true;
    let mut consumer_open = true;

    debug!("metrics accumulation started");

    loop {
        tokio::select! {
            pm = producer.recv(), if producer_open => match pm {
                Some(pm) => {
                    lock(&state).record_producer(&pm);
                }
                None => {
                    producer_open = false;
                    debug!("producer metrics stream closed");
                }
            },
            cm = consumer.recv(), if consumer_open => match cm {
                Some(cm) => {
                    lock(&state).record_consumer(&cm);
                }
                None => {
                    consumer_open = false;
                    debug!("consumer metrics stream closed");
                }
            },
            _ = shutdown.changed() => {
                debug!("metrics accumulation shutting down");
                break;
            }
        }
    }
}
