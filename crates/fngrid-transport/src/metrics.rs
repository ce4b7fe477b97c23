//! Aggregate metric events emitted by producers and consumers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `count` messages were produced to `topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerAggregateMetric {
    pub topic: String,
    pub count: u32,
}

impl ProducerAggregateMetric {
    pub fn new(topic: impl Into<String>, count: u32) -> Self {
        Self {
            topic: topic.into(),
            count,
        }
    }
}

/// `count` messages were received from `topic` by the consumer group of
/// `function`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerAggregateMetric {
    pub topic: String,
    /// Name of the consuming function (its consumer group).
    pub function: String,
    /// Pod that did the consuming. Need not survive pod restarts.
    #[serde(default)]
    pub pod: String,
    /// Window the count was aggregated over.
    #[serde(default)]
    pub interval: Duration,
    pub count: u32,
}

impl ConsumerAggregateMetric {
    pub fn new(topic: impl Into<String>, function: impl Into<String>, count: u32) -> Self {
        Self {
            topic: topic.into(),
            function: function.into(),
            pod: String::new(),
            interval: Duration::ZERO,
            count,
        }
    }

    /// Attribute the metric to a pod and aggregation window.
    pub fn with_pod(mut self, pod: impl Into<String>, interval: Duration) -> Self {
        self.pod = pod.into();
        self.interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_metric_defaults_pod_and_interval() {
        let m = ConsumerAggregateMetric::new("orders", "square", 7);
        assert_eq!(m.pod, "");
        assert_eq!(m.interval, Duration::ZERO);

        let m = m.with_pod("square-0", Duration::from_millis(250));
        assert_eq!(m.pod, "square-0");
        assert_eq!(m.interval, Duration::from_millis(250));
        assert_eq!(m.count, 7);
    }

    #[test]
    fn consumer_metric_parses_without_optional_fields() {
        let json = r#"{"topic":"orders","function":"square","count":3}"#;
        let m: ConsumerAggregateMetric = serde_json::from_str(json).unwrap();
        assert_eq!(m, ConsumerAggregateMetric::new("orders", "square", 3));
    }
}
