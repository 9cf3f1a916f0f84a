//! Asynchronous successive halving.
//!
//! Rung `r` is reached at step `min_resource * reduction_factor^(min_early_stopping_rate + r)`.
//! A trial reaching a rung records its value there and continues only if it
//! ranks in the top `1 / reduction_factor` of all values recorded at that rung.

use super::{PruneContext, Pruner};
use crate::trial::{ObjectiveDirection, RungRecord, TrialRecord};

#[derive(Debug, Clone)]
pub struct SuccessiveHalvingPruner {
    min_resource: u64,
    reduction_factor: u64,
    min_early_stopping_rate: u32,
    bootstrap_count: usize,
}

impl SuccessiveHalvingPruner {
    pub fn new(min_resource: u64, reduction_factor: u64) -> Self {
        Self {
            min_resource: min_resource.max(1),
            reduction_factor: reduction_factor.max(2),
            min_early_stopping_rate: 0,
            bootstrap_count: 0,
        }
    }

    pub fn with_min_early_stopping_rate(mut self, rate: u32) -> Self {
        self.min_early_stopping_rate = rate;
        self
    }

    /// Values a rung must hold before anything is promoted past it.
    pub fn with_bootstrap_count(mut self, count: usize) -> Self {
        self.bootstrap_count = count;
        self
    }

    pub fn promotion_step(&self, rung: u32) -> u64 {
        let exponent = self.min_early_stopping_rate.saturating_add(rung);
        self.reduction_factor
            .checked_pow(exponent)
            .and_then(|factor| factor.checked_mul(self.min_resource))
            .unwrap_or(u64::MAX)
    }

    /// True once `trial` has reached the step of its next rung.
    pub(crate) fn at_rung(&self, trial: &TrialRecord) -> bool {
        trial
            .last_step()
            .is_some_and(|step| step >= self.promotion_step(trial.rungs.len() as u32))
    }

    /// Judge `trial` against the rung values of `others`.
    pub(crate) fn prune_among(
        &self,
        others: &[&RungRecord],
        direction: ObjectiveDirection,
        trial: &mut TrialRecord,
    ) -> bool {
        let Some(step) = trial.last_step() else {
            return false;
        };
        let Some(value) = trial.intermediate_values.get(&step).copied() else {
            return false;
        };

        let mut rung = trial.rungs.len() as u32;
        loop {
            if step < self.promotion_step(rung) {
                return false;
            }
            if value.is_nan() {
                return true;
            }

            let mut competing: Vec<f64> = others
                .iter()
                .filter_map(|t| t.rungs.get(&rung).copied())
                .collect();
            competing.push(value);
            trial.rungs.insert(rung, value);

            if competing.len() <= self.bootstrap_count {
                return true;
            }
            if !self.is_promotable(value, competing, direction) {
                return true;
            }
            rung += 1;
        }
    }

    fn is_promotable(&self, value: f64, mut competing: Vec<f64>, direction: ObjectiveDirection) -> bool {
        let promotable = (competing.len() / self.reduction_factor as usize).saturating_sub(1);
        competing.sort_by(|a, b| a.total_cmp(b));
        match direction {
            ObjectiveDirection::Maximize => value >= competing[competing.len() - 1 - promotable],
            ObjectiveDirection::Minimize => value <= competing[promotable],
        }
    }
}

impl Default for SuccessiveHalvingPruner {
    fn default() -> Self {
        Self::new(1, 4)
    }
}

impl Pruner for SuccessiveHalvingPruner {
    fn prune(&self, ctx: &PruneContext<'_>, trial: &mut TrialRecord) -> bool {
        let others: Vec<&RungRecord> = ctx.trials.iter().collect();
        self.prune_among(&others, ctx.direction, trial)
    }

    fn needs_peers(&self, _study_name: &str, trial: &TrialRecord) -> bool {
        self.at_rung(trial)
    }

    fn name(&self) -> &str {
        "successive_halving"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn with_rung(number: usize, rung: u32, value: f64) -> RungRecord {
        let mut trial = TrialRecord::new(Uuid::nil(), number);
        trial.rungs.insert(rung, value);
        RungRecord::from(&trial)
    }

    fn running(step: u64, value: f64) -> TrialRecord {
        let mut trial = TrialRecord::new(Uuid::nil(), 99);
        trial.intermediate_values.insert(step, value);
        trial
    }

    #[test]
    fn promotion_steps_grow_geometrically() {
        let pruner = SuccessiveHalvingPruner::new(1, 3);
        assert_eq!(pruner.promotion_step(0), 1);
        assert_eq!(pruner.promotion_step(1), 3);
        assert_eq!(pruner.promotion_step(2), 9);
        let late = SuccessiveHalvingPruner::new(2, 3).with_min_early_stopping_rate(1);
        assert_eq!(late.promotion_step(0), 6);
    }

    #[test]
    fn nothing_happens_before_first_rung() {
        let pruner = SuccessiveHalvingPruner::new(4, 3);
        let mut trial = running(2, 0.1);
        assert!(!pruner.prune_among(&[], ObjectiveDirection::Maximize, &mut trial));
        assert!(trial.rungs.is_empty());
    }

    #[test]
    fn lone_trial_is_promoted_and_records_rungs() {
        let pruner = SuccessiveHalvingPruner::new(1, 3);
        let mut trial = running(4, 0.7);
        assert!(!pruner.prune_among(&[], ObjectiveDirection::Maximize, &mut trial));
        // Steps 1 and 3 are passed; step 9 is not.
        assert_eq!(trial.rungs.len(), 2);
        assert_eq!(trial.rungs.get(&1), Some(&0.7));
    }

    #[test]
    fn worse_than_top_third_is_pruned() {
        let pruner = SuccessiveHalvingPruner::new(1, 3);
        let others: Vec<RungRecord> = [0.9, 0.8, 0.85, 0.6, 0.7]
            .iter()
            .enumerate()
            .map(|(i, v)| with_rung(i, 0, *v))
            .collect();
        let refs: Vec<&RungRecord> = others.iter().collect();

        let mut bad = running(1, 0.65);
        assert!(pruner.prune_among(&refs, ObjectiveDirection::Maximize, &mut bad));
        assert_eq!(bad.rungs.get(&0), Some(&0.65));

        let mut good = running(1, 0.95);
        assert!(!pruner.prune_among(&refs, ObjectiveDirection::Maximize, &mut good));

        let mut low_loss = running(1, 0.55);
        assert!(!pruner.prune_among(&refs, ObjectiveDirection::Minimize, &mut low_loss));
    }

    #[test]
    fn bootstrap_count_blocks_early_promotion() {
        let pruner = SuccessiveHalvingPruner::new(1, 3).with_bootstrap_count(2);
        let mut trial = running(1, 0.99);
        assert!(pruner.prune_among(&[], ObjectiveDirection::Maximize, &mut trial));
    }

    #[test]
    fn nan_values_are_pruned_once_a_rung_is_reached() {
        let pruner = SuccessiveHalvingPruner::new(2, 3);
        let mut early = running(1, f64::NAN);
        assert!(!pruner.prune_among(&[], ObjectiveDirection::Maximize, &mut early));
        assert!(early.rungs.is_empty());

        let mut at_rung = running(2, f64::NAN);
        assert!(pruner.prune_among(&[], ObjectiveDirection::Maximize, &mut at_rung));
        assert!(at_rung.rungs.is_empty());
    }

    #[test]
    fn peers_are_only_needed_at_promotion_steps() {
        let pruner = SuccessiveHalvingPruner::new(1, 3);
        assert!(!pruner.needs_peers("s", &TrialRecord::new(Uuid::nil(), 0)));
        assert!(!pruner.needs_peers("s", &running(0, 0.5)));
        assert!(pruner.needs_peers("s", &running(1, 0.5)));

        let mut promoted = running(2, 0.5);
        promoted.rungs.insert(0, 0.5);
        assert!(!pruner.needs_peers("s", &promoted));
        promoted.intermediate_values.insert(3, 0.6);
        assert!(pruner.needs_peers("s", &promoted));
    }
}
