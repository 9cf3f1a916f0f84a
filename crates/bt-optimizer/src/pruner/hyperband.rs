//! Hyperband: several successive-halving brackets with different aggressiveness.
//!
//! Each trial is assigned to one bracket by the CRC32 of
//! `"{study_name}_{trial_number}"`, the same assignment Optuna workers make,
//! and only competes with trials of the same
//! bracket. Bracket `i` starts promoting at `min_resource * reduction_factor^i`.

use std::sync::OnceLock;

use super::{PruneContext, Pruner, SuccessiveHalvingPruner};
use crate::trial::{RungRecord, TrialRecord, TrialState};

#[derive(Debug)]
pub struct HyperbandPruner {
    min_resource: u64,
    reduction_factor: u64,
    bootstrap_count: usize,
    /// Filled on first use, or once a trial completes when the maximum
    /// resource is inferred from the study.
    brackets: OnceLock<Vec<SuccessiveHalvingPruner>>,
}

impl HyperbandPruner {
    /// Pruner whose maximum resource is inferred from the first completed trial.
    pub fn new(min_resource: u64, reduction_factor: u64) -> Self {
        Self {
            min_resource: min_resource.max(1),
            reduction_factor: reduction_factor.max(2),
            bootstrap_count: 0,
            brackets: OnceLock::new(),
        }
    }

    pub fn with_max_resource(self, max_resource: u64) -> Self {
        let brackets = self.build_brackets(max_resource);
        let _ = self.brackets.set(brackets);
        self
    }

    pub fn with_bootstrap_count(mut self, count: usize) -> Self {
        self.bootstrap_count = count;
        self
    }

    pub fn n_brackets(&self) -> Option<usize> {
        self.brackets.get().map(Vec::len)
    }

    fn build_brackets(&self, max_resource: u64) -> Vec<SuccessiveHalvingPruner> {
        let ratio = (max_resource.max(self.min_resource) as f64) / self.min_resource as f64;
        // Small epsilon keeps exact powers (e.g. 27 / 1 with factor 3) on the right side.
        let n_brackets = ((ratio.ln() / (self.reduction_factor as f64).ln()) + 1e-9).floor() as usize + 1;
        tracing::debug!(
            "Hyperband: max_resource={max_resource}, {n_brackets} bracket(s)"
        );
        (0..n_brackets)
            .map(|i| {
                SuccessiveHalvingPruner::new(self.min_resource, self.reduction_factor)
                    .with_min_early_stopping_rate(i as u32)
                    .with_bootstrap_count(self.bootstrap_count)
            })
            .collect()
    }

    fn brackets(&self, trials: &[RungRecord]) -> Option<&[SuccessiveHalvingPruner]> {
        if let Some(brackets) = self.brackets.get() {
            return Some(brackets);
        }
        let max_resource = trials
            .iter()
            .filter(|t| t.state == TrialState::Complete)
            .filter_map(|t| t.last_step)
            .max()?
            + 1;
        Some(self.brackets.get_or_init(|| self.build_brackets(max_resource)))
    }

    fn budget(n_brackets: usize, reduction_factor: u64, bracket: usize) -> u64 {
        let s = (n_brackets - 1 - bracket) as i32;
        (n_brackets as f64 * (reduction_factor as f64).powi(s) / (s + 1) as f64).ceil() as u64
    }

    pub(crate) fn bracket_of(&self, n_brackets: usize, study_name: &str, number: usize) -> usize {
        let budgets: Vec<u64> = (0..n_brackets)
            .map(|i| Self::budget(n_brackets, self.reduction_factor, i))
            .collect();
        let total: u64 = budgets.iter().sum();
        let mut n = u64::from(crc32fast::hash(format!("{study_name}_{number}").as_bytes()))
            % total.max(1);
        for (i, budget) in budgets.iter().enumerate() {
            if n < *budget {
                return i;
            }
            n -= budget;
        }
        n_brackets - 1
    }
}

impl Default for HyperbandPruner {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

impl Pruner for HyperbandPruner {
    fn prune(&self, ctx: &PruneContext<'_>, trial: &mut TrialRecord) -> bool {
        let Some(brackets) = self.brackets(ctx.trials) else {
            return false;
        };
        let bracket = self.bracket_of(brackets.len(), ctx.study_name, trial.number);
        let peers: Vec<&RungRecord> = ctx
            .trials
            .iter()
            .filter(|t| self.bracket_of(brackets.len(), ctx.study_name, t.number) == bracket)
            .collect();
        brackets[bracket].prune_among(&peers, ctx.direction, trial)
    }

    fn needs_peers(&self, study_name: &str, trial: &TrialRecord) -> bool {
        // Until the maximum resource is known the study has to be read.
        let Some(brackets) = self.brackets.get() else {
            return true;
        };
        let bracket = self.bracket_of(brackets.len(), study_name, trial.number);
        brackets[bracket].at_rung(trial)
    }

    fn name(&self) -> &str {
        "hyperband"
    }
}
