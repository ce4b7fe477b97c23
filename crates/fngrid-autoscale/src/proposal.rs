//! Scale-down hysteresis for one function.
//!
//! Raising the proposal takes effect immediately. Dropping it to zero
//! only takes effect once a delay window (chosen by the delay policy when
//! the window opens) has passed; until then [`Proposal::get`] keeps
//! reporting the value from before the drop. Further drops inside an open
//! window fold into it rather than restarting it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Returns how long to hold off before a drop takes effect.
pub type DelayFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Stand-in deadline for delays too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

pub struct Proposal {
    value: usize,
    /// Reported while the delay window is open.
    previous_value: usize,
    /// The window is open while `now < delay_deadline`.
    delay_deadline: Instant,
    delay_policy: DelayFn,
}

impl Proposal {
    /// Create a proposal of zero replicas with no window open.
    pub fn new(delay_policy: impl Fn() -> Duration + Send + Sync + 'static) -> Self {
        Self::with_policy(Arc::new(delay_policy))
    }

    fn with_policy(delay_policy: DelayFn) -> Self {
        Self {
            value: 0,
            previous_value: 0,
            delay_deadline: Instant::now(),
            delay_policy,
        }
    }

    pub fn propose(&mut self, value: usize) {
        self.propose_at(value, Instant::now());
    }

    pub fn propose_at(&mut self, value: usize, now: Instant) {
        if value > 0 {
            self.value = value;
            self.previous_value = value;
            self.delay_deadline = now;
            return;
        }

        if value < self.value {
            if now >= self.delay_deadline {
                let delay = (self.delay_policy)();
                self.delay_deadline = now
                    .checked_add(delay)
                    .unwrap_or_else(|| now + FAR_FUTURE);
                self.previous_value = self.value;
            }
            self.value = value;
        }
    }

    pub fn get(&self) -> usize {
        self.get_at(Instant::now())
    }

    pub fn get_at(&self, now: Instant) -> usize {
        if now < self.delay_deadline {
            self.previous_value
        } else {
            self.value
        }
    }

    /// Whether a pending drop is still being held back.
    pub fn is_delaying(&self) -> bool {
        Instant::now() < self.delay_deadline && self.previous_value != self.value
    }
}

impl fmt::Debug for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proposal")
            .field("value", &self.value)
            .field("previous_value", &self.previous_value)
            .field("delay_deadline", &self.delay_deadline)
            .finish_non_exhaustive()
    }
}
