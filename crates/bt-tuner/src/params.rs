//! Tuned hyperparameters, their search domains, and the mapping onto the booster.

use bt_boost::{BoostingType, BoosterParams, DeviceType, Objective};
use bt_optimizer::{ParameterValue, SearchSpace};
use bt_types::{validation_error, BtResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BOOSTING_TYPES: [&str; 3] = ["gbdt", "dart", "rf"];

/// Search domains for every tuned hyperparameter.
pub fn search_space() -> SearchSpace {
    SearchSpace::new()
        .add_choice("boosting_type", BOOSTING_TYPES)
        .add_int("max_depth", 3, 15)
        .add_log_uniform("learning_rate", 1e-5, 1e-1)
        .add_int("n_estimators", 50, 1000)
        .add_float("subsample", 0.5, 1.0)
        .add_int("num_leaves", 8, 32768)
        .add_log_uniform("lambda_l1", 1e-8, 10.0)
        .add_log_uniform("lambda_l2", 1e-8, 10.0)
        .add_float("feature_fraction", 0.4, 1.0)
        .add_int("min_child_samples", 5, 100)
        .add_float("bagging_fraction", 0.4, 1.0)
        .add_int("bagging_freq", 1, 7)
}

/// One hyperparameter proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub boosting_type: BoostingType,
    pub max_depth: i64,
    pub learning_rate: f64,
    pub n_estimators: i64,
    pub subsample: f64,
    pub num_leaves: i64,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    pub feature_fraction: f64,
    pub min_child_samples: i64,
    pub bagging_fraction: f64,
    pub bagging_freq: i64,
}

fn lookup<'a>(params: &'a BTreeMap<String, ParameterValue>, name: &str) -> BtResult<&'a ParameterValue> {
    params
        .get(name)
        .ok_or_else(|| validation_error!("missing hyperparameter {name}"))
}

fn float(params: &BTreeMap<String, ParameterValue>, name: &str) -> BtResult<f64> {
    lookup(params, name)?
        .as_f64()
        .ok_or_else(|| validation_error!("{name} must be numeric"))
}

fn int(params: &BTreeMap<String, ParameterValue>, name: &str) -> BtResult<i64> {
    lookup(params, name)?
        .as_i64()
        .ok_or_else(|| validation_error!("{name} must be an integer"))
}

impl HyperParams {
    /// Read a sampled proposal; out-of-domain values are rejected, never clamped.
    pub fn from_params(params: &BTreeMap<String, ParameterValue>) -> BtResult<Self> {
        let boosting_type = lookup(params, "boosting_type")?
            .as_str()
            .ok_or_else(|| validation_error!("boosting_type must be a string"))?;
        let proposal = Self {
            boosting_type: boosting_type.parse()?,
            max_depth: int(params, "max_depth")?,
            learning_rate: float(params, "learning_rate")?,
            n_estimators: int(params, "n_estimators")?,
            subsample: float(params, "subsample")?,
            num_leaves: int(params, "num_leaves")?,
            lambda_l1: float(params, "lambda_l1")?,
            lambda_l2: float(params, "lambda_l2")?,
            feature_fraction: float(params, "feature_fraction")?,
            min_child_samples: int(params, "min_child_samples")?,
            bagging_fraction: float(params, "bagging_fraction")?,
            bagging_freq: int(params, "bagging_freq")?,
        };
        proposal.validate()?;
        Ok(proposal)
    }

    pub fn to_params(&self) -> BTreeMap<String, ParameterValue> {
        let mut params = BTreeMap::new();
        let mut put = |name: &str, value: ParameterValue| {
            params.insert(name.to_string(), value);
        };
        put(
            "boosting_type",
            ParameterValue::Categorical(self.boosting_type.as_str().to_string()),
        );
        put("max_depth", ParameterValue::Int(self.max_depth));
        put("learning_rate", ParameterValue::Float(self.learning_rate));
        put("n_estimators", ParameterValue::Int(self.n_estimators));
        put("subsample", ParameterValue::Float(self.subsample));
        put("num_leaves", ParameterValue::Int(self.num_leaves));
        put("lambda_l1", ParameterValue::Float(self.lambda_l1));
        put("lambda_l2", ParameterValue::Float(self.lambda_l2));
        put("feature_fraction", ParameterValue::Float(self.feature_fraction));
        put("min_child_samples", ParameterValue::Int(self.min_child_samples));
        put("bagging_fraction", ParameterValue::Float(self.bagging_fraction));
        put("bagging_freq", ParameterValue::Int(self.bagging_freq));
        params
    }

    /// Check every field against its search domain.
    pub fn validate(&self) -> BtResult<()> {
        let params = self.to_params();
        for def in &search_space().parameters {
            let value = lookup(&params, &def.name)?;
            if !def.kind.contains(value) {
                return Err(validation_error!(
                    "{} = {} is outside its domain {:?}",
                    def.name,
                    value,
                    def.kind
                ));
            }
        }
        Ok(())
    }

    /// Booster configuration: the proposal plus the fixed binary/AUC/CPU
    /// settings with trainer logging silenced.
    pub fn to_booster_params(&self, early_stopping_rounds: usize, seed: u64) -> BoosterParams {
        BoosterParams {
            boosting_type: self.boosting_type,
            objective: Objective::Binary,
            device_type: DeviceType::Cpu,
            n_estimators: self.n_estimators as usize,
            learning_rate: self.learning_rate,
            num_leaves: self.num_leaves as usize,
            max_depth: self.max_depth as i32,
            min_child_samples: self.min_child_samples as usize,
            lambda_l1: self.lambda_l1,
            lambda_l2: self.lambda_l2,
            feature_fraction: self.feature_fraction,
            bagging_fraction: Some(self.bagging_fraction),
            subsample: Some(self.subsample),
            bagging_freq: self.bagging_freq as usize,
            seed,
            verbosity: -1,
            early_stopping_rounds: Some(early_stopping_rounds),
            ..BoosterParams::default()
        }
    }
}
