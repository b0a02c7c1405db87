//! Random number plumbing: splittable seeds and small samplers.
//!
//! Every worker owns its generator exclusively; nothing here is shared across
//! threads. The master seed is split into independent per-worker streams the
//! way a seed sequence spawns children.

use crate::error::{Error, Result};
use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64;

/// Derives independent per-worker generators from one master seed.
pub struct SeedSplitter {
    master: Pcg64,
}

impl SeedSplitter {
    /// Creates a splitter from a master seed.
    #[must_use]
    pub fn new(master_seed: u64) -> Self {
        Self {
            master: Pcg64::seed_from_u64(master_seed),
        }
    }

    /// Spawns the next independent generator.
    pub fn split(&mut self) -> Pcg64 {
        let mut seed = <Pcg64 as SeedableRng>::Seed::default();
        self.master.fill_bytes(&mut seed);
        Pcg64::from_seed(seed)
    }
}

/// Samples an exponential deviate with the given rate (inverse mean). A zero
/// rate yields an infinite free path.
pub fn exponential(rng: &mut impl Rng, rate: f64) -> f64 {
    if rate > 0.0 {
        rng.sample::<f64, _>(rand_distr::Exp1) / rate
    } else {
        f64::INFINITY
    }
}

/// Inverse-CDF sampler over a small discrete probability vector.
#[derive(Clone, Debug)]
pub struct Categorical {
    cdf: Vec<f64>,
}

impl Categorical {
    /// Builds the cumulative table from non-negative weights; the weights are
    /// normalized internally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the weights are empty, negative or sum to
    /// zero.
    pub fn new(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::Config("empty probability vector".into()));
        }
        if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(Error::Config("negative probability weight".into()));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(Error::Config("probability weights sum to zero".into()));
        }
        let mut acc = 0.0;
        let cdf = weights
            .iter()
            .map(|w| {
                acc += w / total;
                acc
            })
            .collect();
        Ok(Self { cdf })
    }

    /// Draws one category index.
    pub fn sample(&self, rng: &mut impl Rng) -> usize {
        let u = rng.gen::<f64>();
        self.cdf
            .partition_point(|&c| c < u)
            .min(self.cdf.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_streams_are_distinct() {
        let mut splitter = SeedSplitter::new(7);
        let mut a = splitter.split();
        let mut b = splitter.split();
        let xs: Vec<u64> = (0..4).map(|_| a.next_u64()).collect();
        let ys: Vec<u64> = (0..4).map(|_| b.next_u64()).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn split_is_reproducible() {
        let mut first = SeedSplitter::new(42);
        let mut second = SeedSplitter::new(42);
        assert_eq!(first.split().next_u64(), second.split().next_u64());
    }

    #[test]
    fn categorical_tracks_weights() {
        let cat = Categorical::new(&[1.0, 3.0]).unwrap();
        let mut rng = Pcg64::seed_from_u64(1);
        let n = 100_000;
        let ones = (0..n).filter(|_| cat.sample(&mut rng) == 1).count();
        let p = ones as f64 / f64::from(n);
        assert!((p - 0.75).abs() < 0.01, "p = {p}");
    }

    #[test]
    fn categorical_rejects_bad_weights() {
        assert!(Categorical::new(&[]).is_err());
        assert!(Categorical::new(&[0.0, 0.0]).is_err());
        assert!(Categorical::new(&[1.0, -1.0]).is_err());
    }

    #[test]
    fn exponential_mean_matches_rate() {
        let mut rng = Pcg64::seed_from_u64(3);
        let n = 100_000;
        let mean: f64 = (0..n).map(|_| exponential(&mut rng, 4.0)).sum::<f64>() / f64::from(n);
        assert!((mean - 0.25).abs() < 0.005, "mean = {mean}");
        assert!(exponential(&mut rng, 0.0).is_infinite());
    }
}
