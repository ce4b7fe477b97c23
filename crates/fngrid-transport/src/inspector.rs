//! Read-only queries against the broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::TransportResult;

/// Answers questions about the state of topic queues.
///
/// Queried synchronously while the autoscaler holds its state lock, so
/// implementations should answer from cached broker state where possible.
pub trait Inspector: Send + Sync {
    /// Number of messages on `topic` not yet consumed by `function`.
    fn queue_length(&self, topic: &str, function: &str) -> TransportResult<i64>;
}

impl<T: Inspector + ?Sized> Inspector for Arc<T> {
    fn queue_length(&self, topic: &str, function: &str) -> TransportResult<i64> {
        (**self).queue_length(topic, function)
    }
}

/// Inspector backed by a single shared queue length.
///
/// Clones share the same gauge, so a load generator can keep the length
/// current while the autoscaler reads it. Every topic and function sees
/// the same value.
#[derive(Debug, Clone, Default)]
pub struct QueueGauge {
    length: Arc<AtomicI64>,
}

impl QueueGauge {
    pub fn new(length: i64) -> Self {
        Self {
            length: Arc::new(AtomicI64::new(length)),
        }
    }

    pub fn get(&self) -> i64 {
        self.length.load(Ordering::Relaxed)
    }

    pub fn set(&self, length: i64) {
        self.length.store(length, Ordering::Relaxed);
    }

    pub fn add(&self, n: i64) {
        self.length.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub(&self, n: i64) {
        self.length.fetch_sub(n, Ordering::Relaxed);
    }
}

impl Inspector for QueueGauge {
    fn queue_length(&self, _topic: &str, _function: &str) -> TransportResult<i64> {
        Ok(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_gauge() {
        let gauge = QueueGauge::new(3);
        let reader = gauge.clone();

        gauge.add(4);
        gauge.sub(2);
        assert_eq!(reader.queue_length("orders", "square").unwrap(), 5);

        gauge.set(0);
        assert_eq!(reader.get(), 0);
    }

    #[test]
    fn arc_inspector_delegates() {
        let inspector: Arc<dyn Inspector> = Arc::new(QueueGauge::new(9));
        assert_eq!(inspector.queue_length("any", "thing").unwrap(), 9);
    }
}
