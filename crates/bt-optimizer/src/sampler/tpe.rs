//! Tree-structured Parzen estimator.
//!
//! Finished trials are split into a "below" group (the best `gamma(n)`) and an
//! "above" group (the rest). Each dimension gets two Parzen estimators, `l(x)`
//! fitted on below and `g(x)` on above; candidates are drawn from `l` and the
//! one maximising `l(x) / g(x)` wins. Dimensions are modelled independently.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::f64::consts::{PI, SQRT_2};

use super::{RandomSampler, Sampler};
use crate::search::{ParameterDef, ParameterKind, ParameterValue, SearchSpace};
use crate::trial::{ObjectiveDirection, TrialRecord, TrialState};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct TpeSampler {
    rng: ChaCha8Rng,
    n_startup_trials: usize,
    n_ei_candidates: usize,
    prior_weight: f64,
}

impl TpeSampler {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_os_rng(),
            n_startup_trials: 10,
            n_ei_candidates: 24,
            prior_weight: 1.0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Trials sampled at random before the estimators take over.
    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn with_ei_candidates(mut self, n: usize) -> Self {
        self.n_ei_candidates = n.max(1);
        self
    }

    /// Size of the "below" group for `n` observations.
    pub(crate) fn gamma(n: usize) -> usize {
        ((0.1 * n as f64).ceil() as usize).min(25)
    }

    /// Observation weights, oldest first: flat up to 25, then older
    /// observations ramp down linearly.
    pub(crate) fn default_weights(n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        if n < 25 {
            return vec![1.0; n];
        }
        let ramp_len = n - 25;
        let mut weights: Vec<f64> = (0..ramp_len)
            .map(|i| {
                if ramp_len == 1 {
                    1.0 / n as f64
                } else {
                    let start = 1.0 / n as f64;
                    start + (1.0 - start) * i as f64 / (ramp_len - 1) as f64
                }
            })
            .collect();
        weights.extend(std::iter::repeat(1.0).take(25));
        weights
    }

    /// Split finished trials into (below, above), each in trial-number order.
    fn split_trials<'a>(
        history: &'a [TrialRecord],
        direction: ObjectiveDirection,
    ) -> (Vec<&'a TrialRecord>, Vec<&'a TrialRecord>) {
        let mut ranked: Vec<&TrialRecord> = history
            .iter()
            .filter(|t| match t.state {
                TrialState::Complete => t.value.map_or(false, f64::is_finite),
                TrialState::Pruned => true,
                _ => false,
            })
            .collect();

        // Complete trials by value, then pruned ones by how far they got.
        let rank_value = |t: &TrialRecord| -> f64 {
            let v = t.value.unwrap_or(f64::NAN);
            match direction {
                ObjectiveDirection::Maximize => -v,
                ObjectiveDirection::Minimize => v,
            }
        };
        ranked.sort_by(|a, b| match (a.state, b.state) {
            (TrialState::Complete, TrialState::Complete) => rank_value(a).total_cmp(&rank_value(b)),
            (TrialState::Complete, _) => std::cmp::Ordering::Less,
            (_, TrialState::Complete) => std::cmp::Ordering::Greater,
            _ => b
                .last_step()
                .cmp(&a.last_step())
                .then_with(|| rank_value(a).total_cmp(&rank_value(b))),
        });

        let n_below = Self::gamma(ranked.len());
        let mut below: Vec<&TrialRecord> = ranked[..n_below].to_vec();
        let mut above: Vec<&TrialRecord> = ranked[n_below..].to_vec();
        below.sort_by_key(|t| t.number);
        above.sort_by_key(|t| t.number);
        (below, above)
    }

    fn sample_param(
        &mut self,
        param: &ParameterDef,
        below: &[&TrialRecord],
        above: &[&TrialRecord],
    ) -> ParameterValue {
        let observed = |trials: &[&TrialRecord]| -> Vec<ParameterValue> {
            trials
                .iter()
                .filter_map(|t| t.params.get(&param.name))
                .filter(|v| param.kind.contains(v))
                .cloned()
                .collect()
        };
        let below_values = observed(below);
        let above_values = observed(above);

        match &param.kind {
            ParameterKind::Choice { values } => {
                let index_of = |v: &ParameterValue| {
                    v.as_str().and_then(|s| values.iter().position(|c| c == s))
                };
                let below_idx: Vec<usize> = below_values.iter().filter_map(index_of).collect();
                let above_idx: Vec<usize> = above_values.iter().filter_map(index_of).collect();
                let l = self.categorical_weights(values.len(), &below_idx);
                let g = self.categorical_weights(values.len(), &above_idx);

                let best = (0..self.n_ei_candidates)
                    .map(|_| sample_index(&mut self.rng, &l))
                    .max_by(|&a, &b| {
                        let score = |i: usize| (l[i] + EPS).ln() - (g[i] + EPS).ln();
                        score(a).total_cmp(&score(b))
                    })
                    .unwrap_or(0);
                ParameterValue::Categorical(values[best].clone())
            }
            kind => {
                let Some(domain) = Domain::from_kind(kind) else {
                    return RandomSampler::sample_param(&mut self.rng, param);
                };
                let to_internal = |v: &ParameterValue| v.as_f64().map(|x| domain.to_internal(x));
                let below_x: Vec<f64> = below_values.iter().filter_map(to_internal).collect();
                let above_x: Vec<f64> = above_values.iter().filter_map(to_internal).collect();

                let l = ParzenEstimator::new(&below_x, domain.low, domain.high, self.prior_weight);
                let g = ParzenEstimator::new(&above_x, domain.low, domain.high, self.prior_weight);

                let best = (0..self.n_ei_candidates)
                    .map(|_| l.sample(&mut self.rng))
                    .max_by(|&a, &b| {
                        let score = |x: f64| l.log_pdf(x) - g.log_pdf(x);
                        score(a).total_cmp(&score(b))
                    })
                    .unwrap_or((domain.low + domain.high) / 2.0);
                domain.to_value(best)
            }
        }
    }

    fn categorical_weights(&self, n_choices: usize, observed: &[usize]) -> Vec<f64> {
        let mut weights = vec![self.prior_weight / n_choices as f64; n_choices];
        for (&idx, w) in observed.iter().zip(Self::default_weights(observed.len())) {
            weights[idx] += w;
        }
        let total: f64 = weights.iter().sum();
        weights.iter().map(|w| w / total).collect()
    }
}

impl Default for TpeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for TpeSampler {
    fn sample(
        &mut self,
        space: &SearchSpace,
        history: &[TrialRecord],
        direction: ObjectiveDirection,
    ) -> BTreeMap<String, ParameterValue> {
        let (below, above) = Self::split_trials(history, direction);
        if below.len() + above.len() < self.n_startup_trials || below.is_empty() {
            return space
                .parameters
                .iter()
                .map(|p| (p.name.clone(), RandomSampler::sample_param(&mut self.rng, p)))
                .collect();
        }
        space
            .parameters
            .iter()
            .map(|p| (p.name.clone(), self.sample_param(p, &below, &above)))
            .collect()
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

/// Numeric dimension in the estimator's internal space.
#[derive(Debug, Clone, Copy)]
struct Domain {
    low: f64,
    high: f64,
    log: bool,
    /// Bounds of the emitted value, before any log transform.
    value_bounds: (f64, f64),
    int_bounds: Option<(i64, i64)>,
}

impl Domain {
    fn from_kind(kind: &ParameterKind) -> Option<Self> {
        match *kind {
            ParameterKind::FloatRange { low, high } => Some(Self {
                low,
                high,
                log: false,
                value_bounds: (low, high),
                int_bounds: None,
            }),
            ParameterKind::LogUniform { low, high } if low > 0.0 => Some(Self {
                low: low.ln(),
                high: high.ln(),
                log: true,
                value_bounds: (low, high),
                int_bounds: None,
            }),
            // Integers are modelled on a continuous range widened by half a step.
            ParameterKind::IntRange { low, high } => Some(Self {
                low: low as f64 - 0.5,
                high: high as f64 + 0.5,
                log: false,
                value_bounds: (low as f64, high as f64),
                int_bounds: Some((low, high)),
            }),
            _ => None,
        }
    }

    fn to_internal(&self, x: f64) -> f64 {
        if self.log {
            x.ln()
        } else {
            x
        }
    }

    fn to_value(&self, x: f64) -> ParameterValue {
        let (low, high) = self.value_bounds;
        match self.int_bounds {
            Some((low, high)) => ParameterValue::Int((x.round() as i64).clamp(low, high)),
            None if self.log => ParameterValue::Float(x.exp().clamp(low, high)),
            None => ParameterValue::Float(x.clamp(low, high)),
        }
    }
}

/// Mixture of truncated normals: one per observation plus a flat-ish prior.
#[derive(Debug, Clone)]
struct ParzenEstimator {
    weights: Vec<f64>,
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    low: f64,
    high: f64,
}

impl ParzenEstimator {
    fn new(observations: &[f64], low: f64, high: f64, prior_weight: f64) -> Self {
        let range = (high - low).max(EPS);
        let prior_mu = 0.5 * (low + high);

        let mut weights = TpeSampler::default_weights(observations.len());
        let mut mus = observations.to_vec();
        weights.push(prior_weight);
        mus.push(prior_mu);
        let total: f64 = weights.iter().sum();
        let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();

        // Bandwidth: the wider gap to a sorted neighbour, endpoints included.
        let mut order: Vec<usize> = (0..mus.len()).collect();
        order.sort_by(|&a, &b| mus[a].total_cmp(&mus[b]));
        let mut sigmas = vec![range; mus.len()];
        for (pos, &i) in order.iter().enumerate() {
            let left = if pos == 0 { low } else { mus[order[pos - 1]] };
            let right = if pos + 1 == order.len() { high } else { mus[order[pos + 1]] };
            sigmas[i] = (mus[i] - left).max(right - mus[i]);
        }
        let prior_index = mus.len() - 1;
        sigmas[prior_index] = range;

        let min_sigma = range / (100.0f64).min(1.0 + mus.len() as f64);
        for sigma in &mut sigmas {
            *sigma = sigma.clamp(min_sigma, range);
        }

        Self {
            weights,
            mus,
            sigmas,
            low,
            high,
        }
    }

    fn sample(&self, rng: &mut impl Rng) -> f64 {
        let i = sample_index(rng, &self.weights);
        let (mu, sigma) = (self.mus[i], self.sigmas[i]);
        for _ in 0..100 {
            let x = mu + sigma * standard_normal(rng);
            if x >= self.low && x <= self.high {
                return x;
            }
        }
        mu.clamp(self.low, self.high)
    }

    fn log_pdf(&self, x: f64) -> f64 {
        let density: f64 = self
            .weights
            .iter()
            .zip(self.mus.iter().zip(&self.sigmas))
            .map(|(w, (&mu, &sigma))| {
                let z = (x - mu) / sigma;
                let mass = (normal_cdf((self.high - mu) / sigma) - normal_cdf((self.low - mu) / sigma))
                    .max(EPS);
                w * (-0.5 * z * z).exp() / ((2.0 * PI).sqrt() * sigma * mass)
            })
            .sum();
        (density + EPS).ln()
    }
}

fn sample_index(rng: &mut impl Rng, weights: &[f64]) -> usize {
    let mut u: f64 = rng.random();
    for (i, w) in weights.iter().enumerate() {
        if u < *w {
            return i;
        }
        u -= w;
    }
    weights.len().saturating_sub(1)
}

/// Box-Muller.
fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}
