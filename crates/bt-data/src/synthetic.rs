//! Deterministic synthetic bundles for smoke runs and tests.

use bt_types::{validation_error, BtResult};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::bundle::{DatasetBundle, Split};

impl DatasetBundle {
    /// Generate a noisy, roughly linearly separable binary problem.
    ///
    /// Rows are distributed 60/10/15/15 across train, test, early-stop
    /// validation and tuning validation. Each split is guaranteed to hold both
    /// classes as long as it has at least two rows.
    pub fn synthetic(n_rows: usize, n_features: usize, seed: u64) -> BtResult<Self> {
        if n_features == 0 {
            return Err(validation_error!("synthetic bundle needs at least one feature"));
        }
        if n_rows < 20 {
            return Err(validation_error!(
                "synthetic bundle needs at least 20 rows, got {n_rows}"
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weights: Vec<f64> = (0..n_features)
            .map(|j| {
                let sign = if j % 2 == 0 { 1.0 } else { -0.5 };
                sign / (j as f64 + 1.0)
            })
            .collect();

        let n_test = n_rows / 10;
        let n_early = n_rows * 15 / 100;
        let n_tune = n_rows * 15 / 100;
        let n_train = n_rows - n_test - n_early - n_tune;

        let mut make_split = |name: &str, rows: usize| -> BtResult<Split> {
            let features =
                Array2::from_shape_simple_fn((rows, n_features), || rng.random_range(-1.0..1.0));
            let mut labels = Array1::from_shape_fn(rows, |i| {
                let signal: f64 = features
                    .row(i)
                    .iter()
                    .zip(&weights)
                    .map(|(x, w)| x * w)
                    .sum();
                let noise = rng.random_range(-0.25..0.25);
                if 3.0 * signal + noise > 0.0 {
                    1.0
                } else {
                    0.0
                }
            });
            // Keep both classes present so AUC is defined on every split.
            if rows >= 2 {
                labels[0] = 0.0;
                labels[1] = 1.0;
            }
            Split::new(name, features, labels)
        };

        let train = make_split("train", n_train)?;
        let test = make_split("test", n_test)?;
        let val_early_stop = make_split("val_early_stop", n_early)?;
        let val_tune = make_split("val_tune", n_tune)?;
        DatasetBundle::new(train, test, val_early_stop, val_tune)
    }
}
