//! Area under the ROC curve.

use bt_types::{BtResult, TrainError};

/// AUC as a training-time evaluation metric (higher is better).
#[derive(Debug, Clone, Copy, Default)]
pub struct Auc;

impl Auc {
    pub const NAME: &'static str = "auc";

    /// AUC of `scores` against binary `labels`.
    ///
    /// A validation set containing a single class has no ranking to measure;
    /// it scores 1.0 so that early stopping and pruning keep working.
    pub fn evaluate(&self, scores: &[f64], labels: &[f64]) -> f64 {
        rank_auc(scores, labels).unwrap_or(1.0)
    }

    pub fn higher_is_better(&self) -> bool {
        true
    }
}

/// AUC of `scores` against `labels`, failing when only one class is present.
pub fn roc_auc_score(labels: &[f64], scores: &[f64]) -> BtResult<f64> {
    if labels.len() != scores.len() {
        return Err(TrainError::Metric {
            message: format!(
                "{} labels but {} scores",
                labels.len(),
                scores.len()
            ),
        }
        .into());
    }
    rank_auc(scores, labels).ok_or_else(|| {
        TrainError::Metric {
            message: "only one class present in labels; AUC is undefined".to_string(),
        }
        .into()
    })
}

/// Mann-Whitney formulation with average ranks for ties.
fn rank_auc(scores: &[f64], labels: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y > 0.5).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut pos_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares the mean rank.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] > 0.5 {
                pos_rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos_f = n_pos as f64;
    Some((pos_rank_sum - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}
