//! Scale loop: periodically applies the autoscaler's proposals.
//!
//! Calls [`AutoScaler::propose`] on a fixed cadence, hands every changed
//! replica count to a scale callback (a Deployment patch in production),
//! and tells the autoscaler about the count it just asked for. The
//! cadence doubles as the autoscaler's sampling interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::AutoscaleResult;
use crate::function::FunctionId;
use crate::scaler::AutoScaler;

/// Default reconcile cadence. 97ms avoids accidental lockstep with other
/// periodic activity such as OS schedulers or garbage collectors.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(97);

/// A scaling decision for a single function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified replica count.
    ScaleTo(usize),
    /// No change needed.
    NoChange,
}

/// Callback type for performing scaling actions.
///
/// The scale loop calls this with (function, target_replicas).
pub type ScaleCallback = Box<dyn Fn(&FunctionId, usize) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

/// Drives an [`AutoScaler`] the way a reconcile loop would.
pub struct ScaleLoop {
    scaler: Arc<AutoScaler>,
    /// Replica counts last requested per function.
    applied: HashMap<FunctionId, usize>,
    /// Callback to perform scaling.
    scale_fn: Option<ScaleCallback>,
}

impl ScaleLoop {
    pub fn new(scaler: Arc<AutoScaler>) -> Self {
        Self {
            scaler,
            applied: HashMap::new(),
            scale_fn: None,
        }
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Replica count last requested for `function`.
    pub fn applied(&self, function: &FunctionId) -> Option<usize> {
        self.applied.get(function).copied()
    }

    /// Take one set of proposals and act on the ones that changed.
    ///
    /// A function whose scale callback fails keeps its previous count and
    /// is left out of the result, so the next tick tries again.
    pub async fn reconcile(&mut self) -> Vec<(FunctionId, ScaleDecision)> {
        let proposals = self.scaler.propose();
        self.applied.retain(|function, _| proposals.contains_key(function));

        let mut functions: Vec<(FunctionId, usize)> = proposals.into_iter().collect();
        functions.sort();

        let mut decisions = Vec::with_capacity(functions.len());
        for (function, desired) in functions {
            let current = self.applied.get(&function).copied().unwrap_or(0);
            if desired == current {
                decisions.push((function, ScaleDecision::NoChange));
                continue;
            }

            debug!(%function, from = current, to = desired, "scaling");

            if let Some(ref scale_fn) = self.scale_fn
                && let Err(e) = scale_fn(&function, desired).await
            {
                warn!(
                    %function,
                    target = desired,
                    error = %e,
                    "scaling action failed, retrying next tick"
                );
                continue;
            }

            self.applied.insert(function.clone(), desired);
            self.scaler.inform_function_replicas(&function, desired);
            decisions.push((function, ScaleDecision::ScaleTo(desired)));
        }

        decisions
    }

    /// Run the scale loop until shutdown is signalled.
    ///
    /// Starts the autoscaler's accumulation task first and closes it on
    /// the way out.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> AutoscaleResult<()> {
        self.scaler.run()?;
        info!(interval_ms = interval.as_millis() as u64, "scale loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.reconcile().await;
                }
                _ = shutdown.changed() => {
                    info!("scale loop shutting down");
                    break;
                }
            }
        }

        self.scaler.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use fngrid_transport::{
        ConsumerAggregateMetric, ProducerAggregateMetric, QueueGauge, metrics_channel,
    };

    type Calls = Arc<Mutex<Vec<(String, usize)>>>;

    fn recording_loop(scaler: Arc<AutoScaler>, fail: bool) -> (ScaleLoop, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let scale_fn: ScaleCallback = Box::new(move |function, replicas| {
            recorded
                .lock()
                .unwrap()
                .push((function.name().to_string(), replicas));
            Box::pin(async move {
                if fail {
                    anyhow::bail!("deployment patch rejected");
                }
                Ok(())
            })
        });
        (ScaleLoop::new(scaler).with_scale_fn(scale_fn), calls)
    }

    fn test_scaler(queue: &QueueGauge) -> Arc<AutoScaler> {
        let (_, streams) = metrics_channel();
        Arc::new(AutoScaler::new(streams, queue.clone()))
    }

    #[tokio::test]
    async fn scales_changed_functions_and_informs_scaler() {
        let queue = QueueGauge::default();
        let scaler = test_scaler(&queue);
        let f = FunctionId::new("square");
        scaler.start_monitoring("numbers", &f).unwrap();
        scaler.record_producer_metric(&ProducerAggregateMetric::new("numbers", 5));

        let (mut scale_loop, calls) = recording_loop(scaler.clone(), false);
        let decisions = scale_loop.reconcile().await;

        assert_eq!(decisions, vec![(f.clone(), ScaleDecision::ScaleTo(1))]);
        assert_eq!(*calls.lock().unwrap(), vec![("square".to_string(), 1)]);
        assert_eq!(scaler.replicas(&f), Some(1));
        assert_eq!(scale_loop.applied(&f), Some(1));
    }

    #[tokio::test]
    async fn unchanged_proposal_is_not_applied() {
        let queue = QueueGauge::default();
        let scaler = test_scaler(&queue);
        let f = FunctionId::new("square");
        scaler.start_monitoring("numbers", &f).unwrap();

        let (mut scale_loop, calls) = recording_loop(scaler, false);
        let decisions = scale_loop.reconcile().await;

        assert_eq!(decisions, vec![(f, ScaleDecision::NoChange)]);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_work_holds_one_replica() {
        let queue = QueueGauge::new(12);
        let scaler = test_scaler(&queue);
        let f = FunctionId::new("square");
        scaler.start_monitoring("numbers", &f).unwrap();
        scaler.record_producer_metric(&ProducerAggregateMetric::new("numbers", 5));

        let (mut scale_loop, calls) = recording_loop(scaler, false);
        scale_loop.reconcile().await;

        // Nothing new produced, but the queue is not drained.
        let decisions = scale_loop.reconcile().await;
        assert_eq!(decisions, vec![(f.clone(), ScaleDecision::NoChange)]);

        queue.set(0);
        let decisions = scale_loop.reconcile().await;
        assert_eq!(decisions, vec![(f, ScaleDecision::ScaleTo(0))]);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_scale_is_retried_and_not_reported() {
        let queue = QueueGauge::default();
        let scaler = test_scaler(&queue);
        let f = FunctionId::new("square");
        scaler.start_monitoring("numbers", &f).unwrap();
        scaler.inform_function_replicas(&f, 1);

        let (mut scale_loop, calls) = recording_loop(scaler.clone(), true);
        for attempt in 1..=2 {
            scaler.record_producer_metric(&ProducerAggregateMetric::new("numbers", 50));
            scaler.record_consumer_metric(&ConsumerAggregateMetric::new(
                "numbers", "square", 10,
            ));

            // 1 * 50 / 10 every time: the rejected target never feeds back.
            let decisions = scale_loop.reconcile().await;
            assert!(decisions.is_empty());
            assert_eq!(calls.lock().unwrap().len(), attempt);
            assert_eq!(calls.lock().unwrap()[attempt - 1], ("square".to_string(), 5));
            assert_eq!(scaler.replicas(&f), Some(1));
            assert_eq!(scale_loop.applied(&f), None);
        }
    }

    #[tokio::test]
    async fn forgets_functions_no_longer_monitored() {
        let queue = QueueGauge::default();
        let scaler = test_scaler(&queue);
        let f = FunctionId::new("square");
        scaler.start_monitoring("numbers", &f).unwrap();
        scaler.record_producer_metric(&ProducerAggregateMetric::new("numbers", 1));

        let mut scale_loop = ScaleLoop::new(scaler.clone());
        scale_loop.reconcile().await;
        assert_eq!(scale_loop.applied(&f), Some(1));

        scaler.stop_monitoring("numbers", &f).unwrap();
        assert!(scale_loop.reconcile().await.is_empty());
        assert_eq!(scale_loop.applied(&f), None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reconciles_until_shutdown() {
        let (sender, streams) = metrics_channel();
        let scaler = Arc::new(AutoScaler::new(streams, QueueGauge::default()));
        let f = FunctionId::new("square");
        scaler.start_monitoring("numbers", &f).unwrap();

        let (scale_loop, calls) = recording_loop(scaler.clone(), false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut scale_loop = scale_loop;
            scale_loop.run(DEFAULT_INTERVAL, shutdown_rx).await
        });

        tokio::task::yield_now().await;
        sender.produced("numbers", 3).unwrap();
        tokio::time::sleep(DEFAULT_INTERVAL * 2).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(calls.lock().unwrap().contains(&("square".to_string(), 1)));
        // The loop closed the autoscaler on its way out.
        assert_eq!(
            scaler.close().await,
            Err(crate::error::AutoscaleError::NotRunning)
        );
    }
}
