//! Synthetic producer workloads.
//!
//! Each workload maps a simulation step to the number of messages written
//! during that step. A step stands for 100ms of wall-clock time.

use clap::ValueEnum;

pub const DEFAULT_MAX_WRITES_PER_TICK: usize = 40;

/// Steps in one radian of the sine workload.
const SINE_PERIOD_STEPS: f64 = 167.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Workload {
    /// Quiet, half load, full load, half load, quiet.
    Step,
    /// Load oscillating around half of the maximum.
    Sine,
    /// Linear ramp up to the maximum and back down.
    Ramp,
    /// Step, sine and ramp phases separated by quiet intervals.
    Combined,
}

impl Workload {
    pub const ALL: [Workload; 4] = [
        Workload::Step,
        Workload::Sine,
        Workload::Ramp,
        Workload::Combined,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Workload::Step => "step",
            Workload::Sine => "sine",
            Workload::Ramp => "ramp",
            Workload::Combined => "combined",
        }
    }

    /// Messages written at `step` when the heaviest load is `max` per step.
    pub fn writes(self, step: usize, max: usize) -> usize {
        match self {
            Workload::Step => step_writes(step, max),
            Workload::Sine => match step {
                0..100 => 0,
                _ => sine_writes(step - 100, max),
            },
            Workload::Ramp => match step {
                0..100 => 0,
                _ => ramp_writes(step - 100, max),
            },
            Workload::Combined => match step {
                0..4000 => step_writes(step, max),
                4000..6000 => sine_writes(step - 4000, max),
                6000..7000 => 0,
                _ => ramp_writes(step - 7000, max),
            },
        }
    }
}

fn step_writes(step: usize, max: usize) -> usize {
    match step {
        0..100 => 0,
        100..1000 => max / 2,
        1000..2000 => max,
        2000..3000 => max / 2,
        _ => 0,
    }
}

fn sine_writes(offset: usize, max: usize) -> usize {
    let half = max as f64 / 2.0;
    let writes = half + half * (offset as f64 / SINE_PERIOD_STEPS).sin();
    writes.round().max(0.0) as usize
}

/// Up over 1000 steps, down over the next 1000, then quiet.
fn ramp_writes(offset: usize, max: usize) -> usize {
    match offset {
        0..1000 => max * offset / 1000,
        1000..2000 => max * (2000 - offset) / 1000,
        _ => 0,
    }
}
