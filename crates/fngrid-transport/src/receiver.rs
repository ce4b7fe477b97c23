//! The two unbounded metric streams the autoscaler drains.

use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::metrics::{ConsumerAggregateMetric, ProducerAggregateMetric};

/// Receiving halves of the producer and consumer metric streams.
///
/// A stream ends when every [`MetricsSender`] feeding it is dropped.
#[derive(Debug)]
pub struct MetricsStreams {
    pub producer: mpsc::UnboundedReceiver<ProducerAggregateMetric>,
    pub consumer: mpsc::UnboundedReceiver<ConsumerAggregateMetric>,
}

/// Source of aggregate metrics for the autoscaler.
///
/// Implementations hand over their streams exactly once, when the
/// autoscaler starts its accumulation task.
pub trait MetricsReceiver: Send + 'static {
    fn into_streams(self: Box<Self>) -> MetricsStreams;
}

impl MetricsReceiver for MetricsStreams {
    fn into_streams(self: Box<Self>) -> MetricsStreams {
        *self
    }
}

/// Sending half of a [`metrics_channel`].
#[derive(Debug, Clone)]
pub struct MetricsSender {
    producer: mpsc::UnboundedSender<ProducerAggregateMetric>,
    consumer: mpsc::UnboundedSender<ConsumerAggregateMetric>,
}

impl MetricsSender {
    pub fn send_producer(&self, metric: ProducerAggregateMetric) -> TransportResult<()> {
        self.producer
            .send(metric)
            .map_err(|_| TransportError::StreamClosed("producer"))
    }

    pub fn send_consumer(&self, metric: ConsumerAggregateMetric) -> TransportResult<()> {
        self.consumer
            .send(metric)
            .map_err(|_| TransportError::StreamClosed("consumer"))
    }

    /// Report `count` messages produced to `topic`.
    pub fn produced(&self, topic: &str, count: u32) -> TransportResult<()> {
        self.send_producer(ProducerAggregateMetric::new(topic, count))
    }

    /// Report `count` messages consumed from `topic` by `function`.
    pub fn consumed(&self, topic: &str, function: &str, count: u32) -> TransportResult<()> {
        self.send_consumer(ConsumerAggregateMetric::new(topic, function, count))
    }
}

/// Create a connected sender/streams pair backed by unbounded channels.
pub fn metrics_channel() -> (MetricsSender, MetricsStreams) {
    let (producer_tx, producer_rx) = mpsc::unbounded_channel();
    let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
    (
        MetricsSender {
            producer: producer_tx,
            consumer: consumer_tx,
        },
        MetricsStreams {
            producer: producer_rx,
            consumer: consumer_rx,
        },
    )
}
