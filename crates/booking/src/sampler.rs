//! Randomness used by the booking handlers.
//!
//! Handlers never call the RNG directly; they ask a [`Sampler`]. Production
//! uses [`RandomSampler`], tests inject [`FixedSampler`] or
//! [`ScriptedSampler`] for deterministic runs.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};

use rand::Rng;

pub trait Sampler: Send + Sync + 'static {
    /// A value in `range` (inclusive on both ends).
    fn sample(&self, range: RangeInclusive<u32>) -> u32;
}

/// Uniform samples from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn sample(&self, range: RangeInclusive<u32>) -> u32 {
        rand::thread_rng().gen_range(range)
    }
}

/// Always the same value, clamped into the requested range.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub u32);

impl Sampler for FixedSampler {
    fn sample(&self, range: RangeInclusive<u32>) -> u32 {
        self.0.clamp(*range.start(), *range.end())
    }
}

/// Plays back a script of values, then falls back to a fixed value.
#[derive(Debug)]
pub struct ScriptedSampler {
    script: Mutex<VecDeque<u32>>,
    fallback: FixedSampler,
}

impl ScriptedSampler {
    pub fn new(script: impl IntoIterator<Item = u32>, fallback: u32) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: FixedSampler(fallback),
        }
    }
}

impl Sampler for ScriptedSampler {
    fn sample(&self, range: RangeInclusive<u32>) -> u32 {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(value) => value.clamp(*range.start(), *range.end()),
            None => self.fallback.sample(range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scripted_values_come_first() {
        let sampler = ScriptedSampler::new([0, 99], 3);
        assert_eq!(sampler.sample(0..=9), 0);
        assert_eq!(sampler.sample(1..=40), 40);
        assert_eq!(sampler.sample(1..=40), 3);
    }

    proptest! {
        #[test]
        fn random_samples_stay_in_range(lo in 0u32..100, width in 0u32..100) {
            let hi = lo + width;
            let value = RandomSampler.sample(lo..=hi);
            prop_assert!((lo..=hi).contains(&value));
        }

        #[test]
        fn fixed_samples_are_clamped(value in any::<u32>()) {
            let sampled = FixedSampler(value).sample(1..=10);
            prop_assert!((1..=10).contains(&sampled));
        }
    }
}
