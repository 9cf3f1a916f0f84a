use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use super::Sampler;
use crate::search::{ParameterDef, ParameterKind, ParameterValue, SearchSpace};
use crate::trial::{ObjectiveDirection, TrialRecord};

/// Independent uniform sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: ChaCha8Rng,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_os_rng(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub(crate) fn sample_param(rng: &mut impl Rng, param: &ParameterDef) -> ParameterValue {
        match &param.kind {
            ParameterKind::FloatRange { low, high } => {
                ParameterValue::Float(if low < high { rng.random_range(*low..=*high) } else { *low })
            }
            ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
            ParameterKind::LogUniform { low, high } => {
                let log_val: f64 = if low < high {
                    rng.random_range(low.ln()..=high.ln())
                } else {
                    low.ln()
                };
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            ParameterKind::Choice { values } => {
                let idx = rng.random_range(0..values.len());
                ParameterValue::Categorical(values[idx].clone())
            }
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn sample(
        &mut self,
        space: &SearchSpace,
        _history: &[TrialRecord],
        _direction: ObjectiveDirection,
    ) -> BTreeMap<String, ParameterValue> {
        space
            .parameters
            .iter()
            .map(|param| (param.name.clone(), Self::sample_param(&mut self.rng, param)))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}
