//! # bt-boost
//!
//! LightGBM-style gradient-boosted decision trees for binary classification.
//!
//! Features are quantised into at most 255 bins per column, trees are grown
//! leaf-wise under `num_leaves` / `max_depth` limits with L1/L2 regularised
//! leaf values, and boosting runs in `gbdt`, `dart` or `rf` mode. Training
//! evaluates AUC on an optional validation set after every round, supports
//! early stopping, and hands each evaluation to user callbacks, which may
//! halt training or abort it with an error.

mod binning;
mod callback;
mod classifier;
mod grower;
mod metric;
mod objective;
mod params;
mod sampling;
mod tree;

pub use callback::{EarlyStopping, EvalRecord, TrainingCallback};
pub use classifier::{EvalSet, GbdtClassifier};
pub use metric::{roc_auc_score, Auc};
pub use params::{BoosterParams, BoostingType, DeviceType, Objective};
pub use tree::Tree;
