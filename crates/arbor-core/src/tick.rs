use crate::{rng, SplitMix64};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    /// 1-based tick number within the owning execution.
    pub tick: u64,
    pub dt_seconds: f32,
    pub seed: u64,
}

impl TickContext {
    pub fn new(tick: u64, seed: u64) -> Self {
        Self {
            tick,
            dt_seconds: 0.0,
            seed,
        }
    }

    pub fn with_dt(mut self, dt_seconds: f32) -> Self {
        self.dt_seconds = dt_seconds;
        self
    }

    /// RNG stream that depends only on the seed, this tick and `stream`.
    pub fn rng_for(&self, stream: u64) -> SplitMix64 {
        SplitMix64::new(rng::tick_seed(self.seed, self.tick, stream))
    }
}
