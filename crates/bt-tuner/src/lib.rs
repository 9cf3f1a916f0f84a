//! # bt-tuner
//!
//! Hyperparameter search for a boosted-tree binary classifier.
//!
//! The [`ObjectiveEvaluator`] trains one classifier per trial and scores it by
//! AUC on the tuning split, reporting per-round validation AUC to the trial so
//! the pruner can stop it early. The [`SearchDriver`] attaches to an existing
//! study and runs trials until the budget is reached.

pub mod config;
pub mod driver;
pub mod objective;
pub mod params;
pub mod progress;

pub use config::TunerConfig;
pub use driver::{RunSummary, SearchDriver, COMPLETION_MESSAGE};
pub use objective::{DataSource, ObjectiveEvaluator, PruningCallback};
pub use params::{search_space, HyperParams};
pub use progress::ProgressBar;
