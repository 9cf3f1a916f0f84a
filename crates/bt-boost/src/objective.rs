//! Binary log-loss gradients.

use bt_types::{BtResult, TrainError};
use ndarray::ArrayView1;

const PROB_EPS: f64 = 1e-15;
const MIN_HESSIAN: f64 = 1e-16;

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Labels must be exactly 0 or 1.
pub(crate) fn check_labels(labels: ArrayView1<'_, f64>) -> BtResult<()> {
    match labels.iter().find(|&&y| y != 0.0 && y != 1.0) {
        Some(&value) => Err(TrainError::InvalidLabel { value }.into()),
        None => Ok(()),
    }
}

/// Log-odds of the positive rate, the starting raw score for every row.
pub(crate) fn init_score(labels: ArrayView1<'_, f64>) -> f64 {
    let n = labels.len().max(1) as f64;
    let p = (labels.sum() / n).clamp(PROB_EPS, 1.0 - PROB_EPS);
    (p / (1.0 - p)).ln()
}

/// Fill first and second derivatives of log-loss at `scores`.
pub(crate) fn gradients(
    scores: &[f64],
    labels: ArrayView1<'_, f64>,
    grad: &mut [f64],
    hess: &mut [f64],
) {
    for (i, (&s, &y)) in scores.iter().zip(labels.iter()).enumerate() {
        let p = sigmoid(s);
        grad[i] = p - y;
        hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
    }
}
