//! Randomness sources
//!
//! Every random decision in fault injection and simulation goes through
//! `Rng`, so a seed fully determines a run.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub trait Rng: Send + 'static {
    fn next_u64(&mut self) -> u64;

    /// Uniform in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        let val = self.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }

    fn shuffle<T>(&mut self, slice: &mut [T])
    where
        Self: Sized,
    {
        for i in (1..slice.len()).rev() {
            let j = self.gen_range(0, (i + 1) as u64) as usize;
            slice.swap(i, j);
        }
    }
}

/// Seeded ChaCha8 generator for reproducible runs
pub struct SimulatedRng {
    rng: ChaCha8Rng,
}

impl SimulatedRng {
    pub fn new(seed: u64) -> Self {
        SimulatedRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Rng for SimulatedRng {
    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

/// Entropy-seeded generator
pub struct ProductionRng {
    rng: rand::rngs::StdRng,
}

impl ProductionRng {
    pub fn new() -> Self {
        ProductionRng {
            rng: rand::rngs::StdRng::from_entropy(),
        }
    }
}

impl Default for ProductionRng {
    fn default() -> Self {
        Self::new()
    }
}

impl Rng for ProductionRng {
    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}
