//! Replica start-up model.
//!
//! Raising the desired count schedules the new replicas to come live after
//! an initialisation delay; the very first start additionally pays an
//! image pull delay. Lowering it takes effect at once, cancelling replicas
//! that have not started yet before stopping live ones. A real cluster
//! would report starting replicas too; this model only counts live ones.

pub const DEFAULT_INIT_DELAY: usize = 15;
pub const DEFAULT_PULL_DELAY: usize = 0;

#[derive(Debug, Clone)]
pub struct ReplicaModel {
    /// Current time in ticks.
    now: usize,
    actual: usize,
    last_desired: usize,
    /// Tick at which each pending replica becomes live.
    scheduled: Vec<usize>,
    init_delay: usize,
    /// Extra delay, consumed by the first scale up.
    pull_delay: usize,
}

impl ReplicaModel {
    pub fn new(init_delay: usize, pull_delay: usize) -> Self {
        Self {
            now: 0,
            actual: 0,
            last_desired: 0,
            scheduled: Vec::new(),
            init_delay,
            pull_delay,
        }
    }

    pub fn desire(&mut self, desired: usize) {
        if desired > self.last_desired {
            let live_at = self.now + self.init_delay + std::mem::take(&mut self.pull_delay);
            self.scheduled
                .extend(std::iter::repeat_n(live_at, desired - self.last_desired));
        } else if desired < self.last_desired {
            self.trim(self.last_desired - desired);
        }
        self.last_desired = desired;
    }

    fn trim(&mut self, count: usize) {
        if count >= self.scheduled.len() {
            let cancelled = self.scheduled.len();
            self.scheduled.clear();
            self.actual = self.actual.saturating_sub(count - cancelled);
        } else {
            self.scheduled.truncate(self.scheduled.len() - count);
        }
    }

    /// Advance one tick, bringing due replicas live.
    pub fn tick(&mut self) {
        self.now += 1;
        let now = self.now;
        let before = self.scheduled.len();
        self.scheduled.retain(|&live_at| live_at > now);
        self.actual += before - self.scheduled.len();
    }

    pub fn actual(&self) -> usize {
        self.actual
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }
}

impl Default for ReplicaModel {
    fn default() -> Self {
        Self::new(DEFAULT_INIT_DELAY, DEFAULT_PULL_DELAY)
    }
}
