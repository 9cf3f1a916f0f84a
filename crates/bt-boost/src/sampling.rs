//! Row bagging and per-tree feature sub-sampling.

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub(crate) struct RowSampler {
    rng: ChaCha8Rng,
    n_rows: usize,
    fraction: f64,
    freq: usize,
    current: Vec<u32>,
}

impl RowSampler {
    pub(crate) fn new(n_rows: usize, fraction: f64, freq: usize, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            n_rows,
            fraction,
            freq,
            current: (0..n_rows as u32).collect(),
        }
    }

    fn enabled(&self) -> bool {
        self.freq > 0 && self.fraction < 1.0
    }

    /// Rows used by the tree of `iteration`; resampled every `freq` rounds.
    pub(crate) fn rows_for(&mut self, iteration: usize) -> Vec<u32> {
        if self.enabled() && iteration % self.freq == 0 {
            let k = ((self.n_rows as f64 * self.fraction).round() as usize).clamp(1, self.n_rows);
            let mut rows: Vec<u32> = index::sample(&mut self.rng, self.n_rows, k)
                .into_iter()
                .map(|i| i as u32)
                .collect();
            rows.sort_unstable();
            self.current = rows;
        }
        self.current.clone()
    }
}

pub(crate) struct FeatureSampler {
    rng: ChaCha8Rng,
    n_features: usize,
    fraction: f64,
}

impl FeatureSampler {
    pub(crate) fn new(n_features: usize, fraction: f64, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            n_features,
            fraction,
        }
    }

    /// Feature subset for the next tree.
    pub(crate) fn next_tree(&mut self) -> Vec<usize> {
        if self.fraction >= 1.0 {
            return (0..self.n_features).collect();
        }
        let k = ((self.n_features as f64 * self.fraction).round() as usize).clamp(1, self.n_features);
        let mut features = index::sample(&mut self.rng, self.n_features, k).into_vec();
        features.sort_unstable();
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bagging_resamples_on_schedule() {
        let mut sampler = RowSampler::new(100, 0.5, 3, 11);
        let first = sampler.rows_for(0);
        assert_eq!(first.len(), 50);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sampler.rows_for(1), first);
        assert_eq!(sampler.rows_for(2), first);
        let fourth = sampler.rows_for(3);
        assert_eq!(fourth.len(), 50);
        assert_ne!(fourth, first);
    }

    #[test]
    fn disabled_bagging_keeps_all_rows() {
        let mut sampler = RowSampler::new(10, 1.0, 1, 0);
        assert_eq!(sampler.rows_for(0), (0..10).collect::<Vec<u32>>());
        let mut no_freq = RowSampler::new(10, 0.5, 0, 0);
        assert_eq!(no_freq.rows_for(0).len(), 10);
    }

    #[test]
    fn feature_fraction_keeps_at_least_one() {
        let mut sampler = FeatureSampler::new(3, 0.1, 5);
        assert_eq!(sampler.next_tree().len(), 1);
        let mut half = FeatureSampler::new(10, 0.5, 5);
        let subset = half.next_tree();
        assert_eq!(subset.len(), 5);
        assert!(subset.iter().all(|&f| f < 10));
    }
}
