//! Task duration sampling.
//!
//! The engine treats task durations as an injected oracle: it asks once per
//! task start and takes the answer as authoritative. [`ExpectedDuration`]
//! returns the stage's expected duration and keeps episodes deterministic;
//! [`TraceDurations`] replays historical trace buckets keyed by colocated
//! worker count and by how warm the worker is, trying an ordered list of
//! sampling strategies until one produces a value.

use rand::prelude::IndexedRandom;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::PrevAssignment;

/// Worker-count reference levels the historical traces were recorded at.
pub const WORKER_COUNT_LEVELS: [usize; 8] = [5, 10, 20, 40, 50, 60, 80, 100];

/// Everything the oracle may condition a sample on.
#[derive(Debug, Clone, Copy)]
pub struct DurationRequest {
    /// The stage's expected task duration for this worker's type.
    pub expected: f64,
    /// What the worker was doing before this assignment.
    pub prev: PrevAssignment,
    /// Workers currently local to the task's job, including this one.
    pub colocated_workers: usize,
}

/// Source of task durations, injected at construction.
pub trait DurationOracle {
    /// Reseeds any internal randomness. Called by the engine at reset.
    fn reset_rng(&mut self, seed: u64);

    /// Samples the duration of one task.
    fn sample(&mut self, request: &DurationRequest) -> f64;
}

/// Deterministic oracle: every task takes its expected duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedDuration;

impl DurationOracle for ExpectedDuration {
    fn reset_rng(&mut self, _seed: u64) {}

    fn sample(&mut self, request: &DurationRequest) -> f64 {
        request.expected
    }
}

/// Which historical wave a sample is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wave {
    /// Durations observed on workers fresh to the job.
    Fresh,
    /// First task a worker ran on a stage.
    FirstWave,
    /// Subsequent tasks on the same stage.
    RestWave,
}

/// Historical duration samples for one worker-count reference level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaveBuckets {
    pub fresh: Vec<f64>,
    pub first_wave: Vec<f64>,
    pub rest_wave: Vec<f64>,
}

impl WaveBuckets {
    fn bucket(&self, wave: Wave) -> &[f64] {
        match wave {
            Wave::Fresh => &self.fresh,
            Wave::FirstWave => &self.first_wave,
            Wave::RestWave => &self.rest_wave,
        }
    }
}

/// One entry of the sampling cascade: a wave to draw from and whether a
/// warmup delay is added to the draw.
#[derive(Debug, Clone, Copy)]
struct Strategy {
    wave: Wave,
    warmup: bool,
}

/// Trace-driven oracle.
///
/// Buckets are keyed by the [`WORKER_COUNT_LEVELS`] the traces were recorded
/// at; a request's colocated count is mapped onto an adjacent pair of levels
/// and one of the two is picked with probability proportional to proximity.
/// For each warmth state an ordered cascade of waves is tried; if every
/// bucket is empty the stage's expected duration is used.
#[derive(Debug, Clone)]
pub struct TraceDurations {
    buckets: Vec<(usize, WaveBuckets)>,
    warmup_delay: f64,
    rng: SmallRng,
}

impl TraceDurations {
    /// Creates an oracle with no trace data and the default warmup delay.
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            warmup_delay: 1000.0,
            rng: SmallRng::seed_from_u64(0),
        }
    }

    /// Sets the warmup delay added when a cold worker runs a first-wave
    /// sample.
    pub fn with_warmup_delay(mut self, delay: f64) -> Self {
        self.warmup_delay = delay;
        self
    }

    /// Installs trace samples for one reference level.
    pub fn with_level(mut self, level: usize, buckets: WaveBuckets) -> Self {
        match self.buckets.binary_search_by_key(&level, |&(l, _)| l) {
            Ok(pos) => self.buckets[pos].1 = buckets,
            Err(pos) => self.buckets.insert(pos, (level, buckets)),
        }
        self
    }

    /// The cascade tried for a given warmth state, in priority order.
    fn cascade(prev: PrevAssignment) -> &'static [Strategy] {
        match prev {
            PrevAssignment::Idle => &[
                Strategy {
                    wave: Wave::Fresh,
                    warmup: false,
                },
                Strategy {
                    wave: Wave::FirstWave,
                    warmup: true,
                },
            ],
            PrevAssignment::SameStage => &[
                Strategy {
                    wave: Wave::RestWave,
                    warmup: false,
                },
                Strategy {
                    wave: Wave::FirstWave,
                    warmup: false,
                },
                Strategy {
                    wave: Wave::Fresh,
                    warmup: false,
                },
            ],
            PrevAssignment::SwitchedStage => &[
                Strategy {
                    wave: Wave::FirstWave,
                    warmup: false,
                },
                Strategy {
                    wave: Wave::Fresh,
                    warmup: false,
                },
            ],
        }
    }

    /// Maps a colocated worker count onto the enclosing pair of reference
    /// levels.
    fn level_interval(colocated: usize) -> (usize, usize) {
        let levels = WORKER_COUNT_LEVELS;
        if colocated <= levels[0] {
            return (levels[0], levels[0]);
        }
        for window in levels.windows(2) {
            let (left, right) = (window[0], window[1]);
            if colocated < right {
                return (left, right);
            }
            if colocated == right {
                return (right, right);
            }
        }
        (levels[levels.len() - 1], levels[levels.len() - 1])
    }

    /// Picks the trace level to sample at for a colocated count.
    fn sample_level(&mut self, colocated: usize) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        let (left, right) = Self::level_interval(colocated);
        let key = if left == right {
            left
        } else {
            // Interpolate: the closer the count is to a level, the likelier
            // that level is chosen.
            let point = self.rng.random_range(1..=(right - left));
            if point <= colocated - left {
                left
            } else {
                right
            }
        };
        if self.buckets.binary_search_by_key(&key, |&(l, _)| l).is_ok() {
            return Some(key);
        }
        // More colocated workers than any recorded level: fall back to the
        // largest level that has data.
        self.buckets.last().map(|&(l, _)| l)
    }

    fn try_strategy(&mut self, level: usize, strategy: Strategy) -> Option<f64> {
        let pos = self.buckets.binary_search_by_key(&level, |&(l, _)| l).ok()?;
        let samples = self.buckets[pos].1.bucket(strategy.wave);
        let &duration = samples.choose(&mut self.rng)?;
        Some(if strategy.warmup {
            duration + self.warmup_delay
        } else {
            duration
        })
    }
}

impl Default for TraceDurations {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationOracle for TraceDurations {
    fn reset_rng(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    fn sample(&mut self, request: &DurationRequest) -> f64 {
        if let Some(level) = self.sample_level(request.colocated_workers) {
            for &strategy in Self::cascade(request.prev) {
                if let Some(duration) = self.try_strategy(level, strategy) {
                    return duration;
                }
            }
        }
        request.expected
    }
}
