//! fngrid-autoscale — rate-matched replica proposals for functions.
//!
//! Ingests produce/consume metric streams per (topic, function), and on
//! every `propose()` turns the counts accumulated since the previous call
//! into a desired replica count per monitored function.
//!
//! # Scaling Algorithm
//!
//! ```text
//! for each monitored (topic, function):
//!     if received == 0:
//!         desired = 0 if transmitted == 0 else 1
//!     else:
//!         desired = floor(actual_replicas * transmitted / received)
//!     desired = min(desired, max_replicas(topic, function))
//!     reset counters
//!
//! proposal(function).propose(desired)   // up: immediate, to 0: delayed
//!
//! if proposal == 0 and actual_replicas > 0 and any queue is non-empty (or unknown):
//!     proposal = 1                      // zero guard
//! ```
//!
//! The accumulation window is the time between successive `propose()`
//! calls, so the driver's cadence is the sampling interval.

pub mod config;
pub mod driver;
pub mod error;
pub mod function;
pub mod proposal;
pub mod scaler;

pub use config::ScalingConfig;
pub use driver::{ScaleCallback, ScaleDecision, ScaleLoop};
pub use error::{AutoscaleError, AutoscaleResult, ConfigError};
pub use function::FunctionId;
pub use proposal::Proposal;
pub use scaler::{AutoScaler, DelayScaleDownPolicy, MaxReplicasPolicy};
