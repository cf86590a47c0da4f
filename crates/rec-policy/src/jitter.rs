//! Injectable randomness for jittered backoff

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Debug;

/// Source of uniform samples in `[0, 1)`
pub trait JitterSource: Send + Sync + Debug {
    /// Draw one sample
    fn sample(&self) -> f64;
}

/// Thread-local OS-seeded generator (production default)
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Deterministic generator for reproducible runs
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Create from a fixed seed
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        self.rng.lock().random::<f64>()
    }
}

/// Always returns the same sample
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(f64);

impl FixedJitter {
    /// Create with a constant sample (clamped into `[0, 1]`)
    #[must_use]
    pub fn new(sample: f64) -> Self {
        Self(sample.clamp(0.0, 1.0))
    }
}

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_rng_samples_unit_interval() {
        let source = ThreadRngJitter;
        for _ in 0..1_000 {
            let s = source.sample();
            assert!((0.0..1.0).contains(&s));
        }
    }

    #[test]
    fn seeded_sequences_match() {
        let a = SeededJitter::new(42);
        let b = SeededJitter::new(42);
        let xs: Vec<f64> = (0..8).map(|_| a.sample()).collect();
        let ys: Vec<f64> = (0..8).map(|_| b.sample()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn fixed_clamps() {
        assert_eq!(FixedJitter::new(3.0).sample(), 1.0);
        assert_eq!(FixedJitter::new(-1.0).sample(), 0.0);
    }
}
