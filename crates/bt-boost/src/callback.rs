//! Per-round evaluation records, user callbacks and early stopping.

use bt_types::BtResult;
use std::ops::ControlFlow;

/// One metric evaluation on the validation set after a boosting round.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalRecord {
    /// 0-based boosting round.
    pub iteration: usize,
    pub dataset: String,
    pub metric: &'static str,
    pub value: f64,
    pub higher_is_better: bool,
}

/// Hook invoked after every evaluated boosting round.
///
/// Returning `ControlFlow::Break(())` ends training gracefully with the trees
/// built so far. Returning an error aborts `fit` and propagates the error, which
/// is how pruning signals leave the trainer.
pub trait TrainingCallback {
    fn after_iteration(&mut self, record: &EvalRecord) -> BtResult<ControlFlow<()>>;
}

impl<F> TrainingCallback for F
where
    F: FnMut(&EvalRecord) -> BtResult<ControlFlow<()>>,
{
    fn after_iteration(&mut self, record: &EvalRecord) -> BtResult<ControlFlow<()>> {
        self(record)
    }
}

/// Early stopping state.
///
/// Tracks the best metric value and signals a stop once `patience` rounds
/// pass without a strict improvement.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_value: Option<f64>,
    best_round: usize,
    current_round: usize,
    higher_is_better: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, higher_is_better: bool) -> Self {
        Self {
            patience,
            best_value: None,
            best_round: 0,
            current_round: 0,
            higher_is_better,
        }
    }

    /// Record this round's metric; returns `true` when training should stop.
    pub fn should_stop(&mut self, value: f64) -> bool {
        let is_improvement = match self.best_value {
            None => true,
            Some(best) => {
                if self.higher_is_better {
                    value > best
                } else {
                    value < best
                }
            }
        };

        if is_improvement {
            self.best_value = Some(value);
            self.best_round = self.current_round;
        }

        self.current_round += 1;
        self.current_round - self.best_round > self.patience
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// 0-based round holding the best value.
    pub fn best_round(&self) -> usize {
        self.best_round
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stop_while_improving() {
        let mut early_stop = EarlyStopping::new(3, true);
        for value in [0.6, 0.7, 0.8, 0.9, 0.95] {
            assert!(!early_stop.should_stop(value));
        }
        assert_eq!(early_stop.best_round(), 4);
    }

    #[test]
    fn stops_after_patience_rounds_without_improvement() {
        let mut early_stop = EarlyStopping::new(2, true);
        assert!(!early_stop.should_stop(0.8)); // round 0 best
        assert!(!early_stop.should_stop(0.7));
        assert!(early_stop.should_stop(0.8)); // equal is not an improvement
        assert_eq!(early_stop.best_round(), 0);
        assert_eq!(early_stop.best_value(), Some(0.8));
    }

    #[test]
    fn lower_is_better_mode() {
        let mut early_stop = EarlyStopping::new(1, false);
        assert!(!early_stop.should_stop(1.0));
        assert!(!early_stop.should_stop(0.5));
        assert!(early_stop.should_stop(0.6));
        assert_eq!(early_stop.best_round(), 1);
    }

    #[test]
    fn closures_are_callbacks() {
        let mut seen = Vec::new();
        let mut cb = |record: &EvalRecord| -> BtResult<ControlFlow<()>> {
            seen.push(record.iteration);
            Ok(ControlFlow::Continue(()))
        };
        let record = EvalRecord {
            iteration: 3,
            dataset: "valid_0".to_string(),
            metric: "auc",
            value: 0.9,
            higher_is_better: true,
        };
        assert_eq!(cb.after_iteration(&record).unwrap(), ControlFlow::Continue(()));
        assert_eq!(seen, vec![3]);
    }
}
