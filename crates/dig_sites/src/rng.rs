//! Seedable random source for reward draws and event selection.
//!
//! Production servers seed from entropy; tests pin a seed so draws are
//! reproducible.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic RNG backed by ChaCha8.
#[derive(Clone, Debug)]
pub struct RotationRng {
    inner: ChaCha8Rng,
}

impl RotationRng {
    /// Create a new RNG with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Create an RNG seeded from the operating system.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    /// Uniform integer in `min..=max`. Returns `min` when the range is inverted.
    pub fn gen_range_u64(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.inner.gen_range(min..=max)
    }

    /// Choose a random element from a slice.
    #[must_use]
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        use rand::seq::SliceRandom;
        slice.choose(&mut self.inner)
    }

    /// Choose an index with probability proportional to its weight.
    ///
    /// Weights do not need to sum to 1.0. Returns `None` if weights are
    /// empty or sum to zero.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }

        let mut threshold = self.inner.gen::<f64>() * total;

        for (i, &weight) in weights.iter().enumerate() {
            if weight <= 0.0 {
                continue;
            }
            threshold -= weight;
            if threshold <= 0.0 {
                return Some(i);
            }
        }

        // Floating point edge case - fall back to the last positive weight
        weights.iter().rposition(|w| *w > 0.0)
    }
}
