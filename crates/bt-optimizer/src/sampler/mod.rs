//! Samplers propose parameters for a new trial from the study history.

mod random;
mod tpe;

pub use random::RandomSampler;
pub use tpe::TpeSampler;

use std::collections::BTreeMap;

use crate::search::{ParameterValue, SearchSpace};
use crate::trial::{ObjectiveDirection, TrialRecord};

/// Common trait for all samplers.
pub trait Sampler: Send {
    /// Propose a value for every dimension of `space`.
    ///
    /// `history` holds every other trial of the study in number order.
    fn sample(
        &mut self,
        space: &SearchSpace,
        history: &[TrialRecord],
        direction: ObjectiveDirection,
    ) -> BTreeMap<String, ParameterValue>;

    /// Human-readable sampler name.
    fn name(&self) -> &str;
}
