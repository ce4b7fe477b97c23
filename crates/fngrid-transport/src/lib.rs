//! fngrid-transport — the message transport as seen by the autoscaler.
//!
//! The autoscaler never talks to a broker directly. It consumes two
//! streams of aggregate metrics and asks an [`Inspector`] for queue
//! lengths when it needs to double-check a scale-to-zero decision.
//!
//! # Architecture
//!
//! ```text
//! MetricsSender ──produced()──▶ MetricsStreams.producer ─┐
//!               ──consumed()──▶ MetricsStreams.consumer ─┴─▶ AutoScaler accumulation task
//!
//! Inspector::queue_length(topic, function) ◀── AutoScaler::propose() (zero guard only)
//! ```

pub mod error;
pub mod inspector;
pub mod metrics;
pub mod receiver;

pub use error::{TransportError, TransportResult};
pub use inspector::{Inspector, QueueGauge};
pub use metrics::{ConsumerAggregateMetric, ProducerAggregateMetric};
pub use receiver::{MetricsReceiver, MetricsSender, MetricsStreams, metrics_channel};
