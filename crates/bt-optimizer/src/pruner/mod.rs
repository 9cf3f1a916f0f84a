//! Pruners decide, from intermediate values, whether a running trial stops early.

mod hyperband;
mod successive_halving;

pub use hyperband::HyperbandPruner;
pub use successive_halving::SuccessiveHalvingPruner;

use crate::trial::{ObjectiveDirection, RungRecord, TrialRecord};

/// What a pruner sees of the study while judging one trial.
#[derive(Debug, Clone, Copy)]
pub struct PruneContext<'a> {
    pub study_name: &'a str,
    pub direction: ObjectiveDirection,
    /// Every other trial of the study.
    pub trials: &'a [RungRecord],
}

/// Common trait for all pruners.
pub trait Pruner: Send + Sync {
    /// Judge `trial` at its latest reported step.
    ///
    /// Pruners may record bookkeeping (rung values) on `trial`; the caller
    /// persists it.
    fn prune(&self, ctx: &PruneContext<'_>, trial: &mut TrialRecord) -> bool;

    /// Whether `prune` has to see the other trials of `study_name` at
    /// `trial`'s latest step.
    ///
    /// Returning false promises that `prune` would neither prune nor touch
    /// `trial`, so the caller skips reading the study.
    fn needs_peers(&self, _study_name: &str, _trial: &TrialRecord) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// Never prunes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopPruner;

impl Pruner for NopPruner {
    fn prune(&self, _ctx: &PruneContext<'_>, _trial: &mut TrialRecord) -> bool {
        false
    }

    fn needs_peers(&self, _study_name: &str, _trial: &TrialRecord) -> bool {
        false
    }

    fn name(&self) -> &str {
        "nop"
    }
}
