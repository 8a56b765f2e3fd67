//! Per-tick random streams.
//!
//! A node never owns generator state between ticks: its stream is re-derived from the runtime
//! seed, the tick number and a hash of its identifier, so a replayed tick rolls the same values.
//! Not cryptographic.

const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;

pub trait DeterministicRng {
    fn next_u64(&mut self) -> u64;

    /// Uniform in `[0, 1)` with 53 bits of precision.
    fn next_f64_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// SplitMix64 generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl DeterministicRng for SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        finalize(self.state)
    }
}

fn finalize(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// Seed for `stream` at `tick`.
pub fn tick_seed(seed: u64, tick: u64, stream: u64) -> u64 {
    finalize(seed ^ finalize(tick.wrapping_add(GOLDEN_GAMMA)) ^ finalize(stream))
}

/// FNV-1a over a node identifier.
pub fn stream_id(name: &str) -> u64 {
    name.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x100000001b3)
    })
}
