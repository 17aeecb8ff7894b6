//! Pseudo-random number generation for dispatch fairness.
//!
//! Channels pick parked peers, and select orders its cases, with a small
//! self-contained xorshift64 generator. Fairness needs uniformity, not
//! cryptographic strength, and a hand-rolled generator keeps randomness off
//! the dependency list. Each channel and each select call seeds its own
//! stream from process entropy, so dispatch order is not reproducible across
//! runs; uniform dispatch is part of the external contract.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// A xorshift64 pseudo-random number generator.
#[derive(Debug, Clone)]
pub(crate) struct Rng {
    state: u64,
}

impl Rng {
    /// Creates a generator from an explicit seed. A zero seed (invalid for
    /// xorshift) is replaced with a fixed odd constant.
    #[must_use]
    pub(crate) const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed },
        }
    }

    /// Seeds a generator from the process's hash randomness mixed with a
    /// global counter, so every channel and select call gets an independent
    /// stream.
    #[must_use]
    pub(crate) fn from_entropy() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
        Self::new(hasher.finish())
    }

    /// The next pseudo-random `u64`.
    #[inline]
    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// A uniform value in `[0, bound)`, using rejection sampling to avoid
    /// modulo bias.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn next_below(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "bound must be non-zero");
        let bound = bound as u64;
        let threshold = u64::MAX - (u64::MAX % bound);
        loop {
            let value = self.next_u64();
            if value < threshold {
                return (value % bound) as usize;
            }
        }
    }

    /// Shuffles a slice in place with Fisher–Yates.
    pub(crate) fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.next_below(i + 1);
            slice.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Rng::new(42);
        let mut b = Rng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn zero_seed_is_replaced() {
        let mut rng = Rng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn entropy_streams_differ() {
        let mut a = Rng::from_entropy();
        let mut b = Rng::from_entropy();
        // 64-bit collision on the first draw is effectively impossible.
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn next_below_stays_in_bounds() {
        let mut rng = Rng::new(7);
        for bound in 1..50 {
            for _ in 0..100 {
                assert!(rng.next_below(bound) < bound);
            }
        }
    }

    #[test]
    fn next_below_covers_small_ranges() {
        let mut rng = Rng::new(11);
        let mut seen = [false; 4];
        for _ in 0..1_000 {
            seen[rng.next_below(4)] = true;
        }
        assert!(seen.iter().all(|&hit| hit));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = Rng::new(99);
        let mut data: Vec<usize> = (0..32).collect();
        rng.shuffle(&mut data);
        let mut sorted = data.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_moves_elements() {
        let mut rng = Rng::new(5);
        let original: Vec<usize> = (0..64).collect();
        let mut data = original.clone();
        rng.shuffle(&mut data);
        assert_ne!(data, original);
    }
}
