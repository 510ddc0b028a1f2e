//! Simulation configuration.
//!
//! All knobs that vary between experiments live here and are fixed at
//! `reset` time: the reward scale, the inter-job worker move cost, an
//! optional simulated-time limit, and the RNG seed. Nothing in the engine
//! hardcodes these.

use serde::{Deserialize, Serialize};

/// Cost model for moving a worker between jobs.
///
/// The delay is charged once per cross-job dispatch, as the gap between the
/// dispatch and the corresponding worker-arrival event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MoveCost {
    /// Constant delay.
    Fixed(f64),
    /// Exponentially distributed delay with the given mean.
    Exponential { mean: f64 },
}

impl MoveCost {
    /// The expected delay of a single move.
    pub fn mean(&self) -> f64 {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { mean } => mean,
        }
    }
}

impl Default for MoveCost {
    fn default() -> Self {
        Self::Fixed(DEFAULT_MOVE_COST)
    }
}

/// Default inter-job move delay, in simulated time units.
pub const DEFAULT_MOVE_COST: f64 = 2000.0;

/// Default multiplier applied to the raw active-job-time penalty.
pub const DEFAULT_REWARD_SCALE: f64 = 1e-5;

/// Reset-time simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Multiplier applied to the accumulated reward to control its magnitude.
    pub reward_scale: f64,
    /// Delay charged when a worker is dispatched to a different job.
    pub move_cost: MoveCost,
    /// Optional hard cutoff on simulated time. Exact and reproducible: the
    /// episode ends before the first event past the limit is processed.
    pub time_limit: Option<f64>,
    /// Seed for all randomness owned by the simulation (move-cost sampling
    /// and the duration oracle).
    pub seed: u64,
}

impl SimConfig {
    /// Creates a configuration with default constants.
    pub fn new() -> Self {
        Self {
            reward_scale: DEFAULT_REWARD_SCALE,
            move_cost: MoveCost::default(),
            time_limit: None,
            seed: 0,
        }
    }

    /// Sets the reward scale.
    pub fn with_reward_scale(mut self, scale: f64) -> Self {
        self.reward_scale = scale;
        self
    }

    /// Sets the inter-job move cost model.
    pub fn with_move_cost(mut self, cost: MoveCost) -> Self {
        self.move_cost = cost;
        self
    }

    /// Sets the simulated-time limit.
    pub fn with_time_limit(mut self, limit: f64) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Sets the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SimConfig::new()
            .with_reward_scale(1e-3)
            .with_move_cost(MoveCost::Exponential { mean: 500.0 })
            .with_time_limit(10_000.0)
            .with_seed(42);

        assert_eq!(config.reward_scale, 1e-3);
        assert_eq!(config.move_cost, MoveCost::Exponential { mean: 500.0 });
        assert_eq!(config.time_limit, Some(10_000.0));
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.reward_scale, DEFAULT_REWARD_SCALE);
        assert_eq!(config.move_cost, MoveCost::Fixed(DEFAULT_MOVE_COST));
        assert_eq!(config.time_limit, None);
    }

    #[test]
    fn test_move_cost_mean() {
        assert_eq!(MoveCost::Fixed(100.0).mean(), 100.0);
        assert_eq!(MoveCost::Exponential { mean: 250.0 }.mean(), 250.0);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = SimConfig::new().with_time_limit(5_000.0);
        let json = serde_json::to_string(&config).unwrap();
        let back: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
