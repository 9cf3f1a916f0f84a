//! Tuner configuration.

use bt_optimizer::FailurePolicy;
use bt_types::{config_error, BtResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DATA_PATH: &str = "data/asg3/complete_data.npz";
pub const DEFAULT_STORAGE_URL: &str = "duckdb://optuna.duckdb";
pub const DEFAULT_STUDY_NAME: &str = "LightGBM_study_mysql";
pub const DEFAULT_N_TRIALS: usize = 2500;
pub const DEFAULT_EARLY_STOPPING_ROUNDS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    /// `.npz` bundle read by every trial.
    pub data_path: PathBuf,
    pub storage_url: String,
    pub study_name: String,
    /// Trial budget; also the study-wide trial number at which the search halts.
    pub n_trials: usize,
    pub early_stopping_rounds: usize,
    /// Seeds the sampler and the booster; `None` samples from entropy.
    pub seed: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Load the bundle once and share it across trials instead of reloading per trial.
    pub reuse_data: bool,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            study_name: DEFAULT_STUDY_NAME.to_string(),
            n_trials: DEFAULT_N_TRIALS,
            early_stopping_rounds: DEFAULT_EARLY_STOPPING_ROUNDS,
            seed: None,
            failure_policy: FailurePolicy::Abort,
            reuse_data: false,
            show_progress: true,
        }
    }
}

impl TunerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    pub fn with_storage_url(mut self, url: impl Into<String>) -> Self {
        self.storage_url = url.into();
        self
    }

    pub fn with_study_name(mut self, name: impl Into<String>) -> Self {
        self.study_name = name.into();
        self
    }

    pub fn with_n_trials(mut self, n: usize) -> Self {
        self.n_trials = n;
        self
    }

    pub fn with_early_stopping_rounds(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = rounds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_reuse_data(mut self, reuse: bool) -> Self {
        self.reuse_data = reuse;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn validate(&self) -> BtResult<()> {
        if self.study_name.trim().is_empty() {
            return Err(config_error!("study name must not be empty"));
        }
        if self.storage_url.trim().is_empty() {
            return Err(config_error!("storage URL must not be empty"));
        }
        if self.early_stopping_rounds == 0 {
            return Err(config_error!("early_stopping_rounds must be at least 1"));
        }
        Ok(())
    }
}
