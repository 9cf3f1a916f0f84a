//! Booster configuration with LightGBM-compatible defaults and checks.

use bt_types::{BtResult, TrainError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Boosting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoostingType {
    /// Classic gradient boosting with shrinkage.
    Gbdt,
    /// Dropouts meet multiple additive regression trees.
    Dart,
    /// Random forest: every tree fits the initial gradients, outputs are averaged.
    Rf,
}

impl BoostingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoostingType::Gbdt => "gbdt",
            BoostingType::Dart => "dart",
            BoostingType::Rf => "rf",
        }
    }
}

impl fmt::Display for BoostingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoostingType {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gbdt" | "gbrt" => Ok(BoostingType::Gbdt),
            "dart" => Ok(BoostingType::Dart),
            "rf" | "random_forest" => Ok(BoostingType::Rf),
            other => Err(TrainError::InvalidParameter {
                parameter: "boosting_type".to_string(),
                message: format!("unknown boosting type '{other}'"),
            }),
        }
    }
}

/// Learning objective. Only binary log-loss is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    #[default]
    Binary,
}

/// Execution device. Training always runs on the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Cpu,
}

/// Full booster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    pub boosting_type: BoostingType,
    pub objective: Objective,
    pub device_type: DeviceType,
    /// Number of boosting rounds.
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    /// Depth limit; `<= 0` means unlimited.
    pub max_depth: i32,
    /// Minimum number of rows in a leaf.
    pub min_child_samples: usize,
    pub min_sum_hessian_in_leaf: f64,
    pub min_gain_to_split: f64,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    /// Fraction of features considered by each tree.
    pub feature_fraction: f64,
    /// Row sampling fraction; takes precedence over `subsample`.
    pub bagging_fraction: Option<f64>,
    /// Alias of `bagging_fraction`, ignored when both are set.
    pub subsample: Option<f64>,
    /// Resample rows every `bagging_freq` rounds; 0 disables bagging.
    pub bagging_freq: usize,
    pub drop_rate: f64,
    pub max_drop: usize,
    pub skip_drop: f64,
    pub max_bin: usize,
    pub seed: u64,
    /// `< 0` silences informational trainer logs.
    pub verbosity: i32,
    /// Stop when the validation metric has not improved for this many rounds.
    pub early_stopping_rounds: Option<usize>,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            boosting_type: BoostingType::Gbdt,
            objective: Objective::Binary,
            device_type: DeviceType::Cpu,
            n_estimators: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: -1,
            min_child_samples: 20,
            min_sum_hessian_in_leaf: 1e-3,
            min_gain_to_split: 0.0,
            lambda_l1: 0.0,
            lambda_l2: 0.0,
            feature_fraction: 1.0,
            bagging_fraction: None,
            subsample: None,
            bagging_freq: 0,
            drop_rate: 0.1,
            max_drop: 50,
            skip_drop: 0.5,
            max_bin: 255,
            seed: 0,
            verbosity: 1,
            early_stopping_rounds: None,
        }
    }
}

impl BoosterParams {
    pub fn with_boosting_type(mut self, boosting_type: BoostingType) -> Self {
        self.boosting_type = boosting_type;
        self
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_early_stopping(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = Some(rounds);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Row sampling fraction after alias resolution.
    pub fn effective_bagging_fraction(&self) -> f64 {
        self.bagging_fraction.or(self.subsample).unwrap_or(1.0)
    }

    /// Whether rows are resampled during training.
    pub fn bagging_enabled(&self) -> bool {
        self.bagging_freq > 0 && self.effective_bagging_fraction() < 1.0
    }

    pub(crate) fn depth_limit(&self) -> Option<usize> {
        (self.max_depth > 0).then_some(self.max_depth as usize)
    }

    pub(crate) fn verbose(&self) -> bool {
        self.verbosity >= 0
    }

    /// Reject configurations the trainer cannot run.
    pub fn validate(&self) -> BtResult<()> {
        fn invalid(parameter: &str, message: String) -> BtResult<()> {
            Err(TrainError::InvalidParameter {
                parameter: parameter.to_string(),
                message,
            }
            .into())
        }

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(
                "learning_rate",
                format!("must be positive, got {}", self.learning_rate),
            );
        }
        if self.n_estimators == 0 {
            return invalid("n_estimators", "must be at least 1".to_string());
        }
        if !(2..=131_072).contains(&self.num_leaves) {
            return invalid(
                "num_leaves",
                format!("must be in [2, 131072], got {}", self.num_leaves),
            );
        }
        if !(self.lambda_l1 >= 0.0) {
            return invalid("lambda_l1", format!("must be >= 0, got {}", self.lambda_l1));
        }
        if !(self.lambda_l2 >= 0.0) {
            return invalid("lambda_l2", format!("must be >= 0, got {}", self.lambda_l2));
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            return invalid(
                "feature_fraction",
                format!("must be in (0, 1], got {}", self.feature_fraction),
            );
        }
        let bagging_fraction = self.effective_bagging_fraction();
        if !(bagging_fraction > 0.0 && bagging_fraction <= 1.0) {
            return invalid(
                "bagging_fraction",
                format!("must be in (0, 1], got {bagging_fraction}"),
            );
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return invalid("drop_rate", format!("must be in [0, 1], got {}", self.drop_rate));
        }
        if !(0.0..=1.0).contains(&self.skip_drop) {
            return invalid("skip_drop", format!("must be in [0, 1], got {}", self.skip_drop));
        }
        if !(2..=255).contains(&self.max_bin) {
            return invalid("max_bin", format!("must be in [2, 255], got {}", self.max_bin));
        }
        if self.boosting_type == BoostingType::Rf
            && !self.bagging_enabled()
            && self.feature_fraction >= 1.0
        {
            return invalid(
                "boosting_type",
                "rf needs bagging (bagging_freq > 0 and bagging_fraction < 1) \
                 or feature_fraction < 1"
                    .to_string(),
            );
        }
        Ok(())
    }
}
