//! Scaling configuration file parser.
//!
//! ```toml
//! [scaler]
//! interval = "97ms"
//! scale_down_delay = "10s"
//! max_replicas = 1000
//!
//! [topics.orders]
//! partitions = 4
//!
//! [functions.square]
//! max_replicas = 3
//! idle_timeout = "30s"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::driver::DEFAULT_INTERVAL;
use crate::error::ConfigError;
use crate::scaler::{AutoScaler, DelayScaleDownPolicy, MaxReplicasPolicy};

const DEFAULT_SCALE_DOWN_DELAY: &str = "10s";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default)]
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub topics: HashMap<String, TopicConfig>,
    #[serde(default)]
    pub functions: HashMap<String, FunctionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_scale_down_delay")]
    pub scale_down_delay: String,
    pub max_replicas: Option<usize>,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            scale_down_delay: default_scale_down_delay(),
            max_replicas: None,
        }
    }
}

/// A topic's partition count caps the replicas of its consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicConfig {
    pub partitions: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub max_replicas: Option<usize>,
    pub idle_timeout: Option<String>,
}

fn default_interval() -> String {
    format!("{}ms", DEFAULT_INTERVAL.as_millis())
}

fn default_scale_down_delay() -> String {
    DEFAULT_SCALE_DOWN_DELAY.to_string()
}

impl ScalingConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration and [`validate`](Self::validate) it, so that
    /// the policies built from it never have to.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ScalingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed durations, a zero interval and zero ceilings.
    ///
    /// A ceiling of zero cannot be honoured: a function with queued work
    /// is held at one replica whatever its ceiling says.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = duration("scaler.interval", &self.scaler.interval)?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "scaler.interval".to_string(),
                value: self.scaler.interval.clone(),
            });
        }
        duration("scaler.scale_down_delay", &self.scaler.scale_down_delay)?;
        at_least_one("scaler.max_replicas", self.scaler.max_replicas)?;

        for (name, topic) in &self.topics {
            at_least_one(&format!("topics.{name}.partitions"), topic.partitions)?;
        }
        for (name, function) in &self.functions {
            at_least_one(&format!("functions.{name}.max_replicas"), function.max_replicas)?;
            if let Some(ref idle_timeout) = function.idle_timeout {
                duration(&format!("functions.{name}.idle_timeout"), idle_timeout)?;
            }
        }
        Ok(())
    }

    /// Reconcile cadence of the scale loop.
    pub fn interval(&self) -> Duration {
        parse_duration(&self.scaler.interval)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_INTERVAL)
    }

    /// Smallest of every ceiling declared for the pair, or `usize::MAX`.
    pub fn max_replicas(&self, topic: &str, function: &str) -> usize {
        [
            self.topics.get(topic).and_then(|t| t.partitions),
            self.functions.get(function).and_then(|f| f.max_replicas),
            self.scaler.max_replicas,
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(usize::MAX)
    }

    /// The function's idle timeout, falling back to the scaler default.
    pub fn delay_scale_down(&self, function: &str) -> Duration {
        self.functions
            .get(function)
            .and_then(|f| f.idle_timeout.as_deref())
            .and_then(parse_duration)
            .unwrap_or_else(|| self.default_scale_down_delay())
    }

    pub fn max_replicas_policy(&self) -> MaxReplicasPolicy {
        let config = Arc::new(self.clone());
        Arc::new(move |topic, function| config.max_replicas(topic, function))
    }

    pub fn delay_scale_down_policy(&self) -> DelayScaleDownPolicy {
        let default = self.default_scale_down_delay();
        let timeouts: HashMap<String, Duration> = self
            .functions
            .iter()
            .filter_map(|(name, f)| {
                let timeout = parse_duration(f.idle_timeout.as_deref()?)?;
                Some((name.clone(), timeout))
            })
            .collect();
        Arc::new(move |function| timeouts.get(function).copied().unwrap_or(default))
    }

    /// Install both policies on `scaler`.
    pub fn apply(&self, scaler: &AutoScaler) {
        let max_replicas = self.max_replicas_policy();
        let delay_scale_down = self.delay_scale_down_policy();
        scaler.set_max_replicas_policy(move |topic, function| max_replicas(topic, function));
        scaler.set_delay_scale_down_policy(move |function| delay_scale_down(function));
        debug!(
            topics = self.topics.len(),
            functions = self.functions.len(),
            "scaling policies applied"
        );
    }

    fn default_scale_down_delay(&self) -> Duration {
        parse_duration(&self.scaler.scale_down_delay).unwrap_or(Duration::from_secs(10))
    }
}

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn at_least_one(field: &str, ceiling: Option<usize>) -> Result<(), ConfigError> {
    match ceiling {
        Some(0) => Err(ConfigError::InvalidReplicas {
            field: field.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Parse "250ms", "30s", "5m" or a bare number of seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
