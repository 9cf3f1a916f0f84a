//! Boosted-tree binary classifier.

use bt_types::{validation_error, BtResult, TrainError};
use ndarray::{ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binning::BinnedMatrix;
use crate::callback::{EarlyStopping, EvalRecord, TrainingCallback};
use crate::grower::{GrowerConfig, TreeGrower};
use crate::metric::Auc;
use crate::objective::{check_labels, gradients, init_score, sigmoid};
use crate::params::{BoosterParams, BoostingType};
use crate::sampling::{FeatureSampler, RowSampler};
use crate::tree::Tree;

/// Validation data monitored during `fit`.
#[derive(Debug, Clone, Copy)]
pub struct EvalSet<'a> {
    pub name: &'a str,
    pub features: ArrayView2<'a, f64>,
    pub labels: ArrayView1<'a, f64>,
}

impl<'a> EvalSet<'a> {
    pub fn new(name: &'a str, features: ArrayView2<'a, f64>, labels: ArrayView1<'a, f64>) -> Self {
        Self {
            name,
            features,
            labels,
        }
    }
}

/// Gradient-boosted tree classifier for 0/1 labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtClassifier {
    params: BoosterParams,
    init_score: f64,
    trees: Vec<Tree>,
    n_features: Option<usize>,
    best_iteration: Option<usize>,
    eval_history: Vec<f64>,
}

impl GbdtClassifier {
    pub fn new(params: BoosterParams) -> Self {
        Self {
            params,
            init_score: 0.0,
            trees: Vec::new(),
            n_features: None,
            best_iteration: None,
            eval_history: Vec::new(),
        }
    }

    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Number of leading trees used for prediction after early stopping.
    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    /// Validation AUC after every completed round.
    pub fn eval_history(&self) -> &[f64] {
        &self.eval_history
    }

    fn note(&self, message: &str) {
        if self.params.verbose() {
            info!("{message}");
        } else {
            debug!("{message}");
        }
    }

    /// Train on `(features, labels)`, optionally monitoring `eval_set`.
    pub fn fit(
        &mut self,
        features: ArrayView2<'_, f64>,
        labels: ArrayView1<'_, f64>,
        eval_set: Option<EvalSet<'_>>,
        callbacks: &mut [&mut dyn TrainingCallback],
    ) -> BtResult<()> {
        self.params.validate()?;
        if features.nrows() == 0 || features.ncols() == 0 {
            return Err(TrainError::EmptyDataset.into());
        }
        if features.nrows() != labels.len() {
            return Err(validation_error!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            ));
        }
        check_labels(labels)?;
        if let Some(eval) = &eval_set {
            if eval.features.ncols() != features.ncols() {
                return Err(TrainError::FeatureMismatch {
                    expected: features.ncols(),
                    actual: eval.features.ncols(),
                }
                .into());
            }
            if eval.features.nrows() != eval.labels.len() {
                return Err(validation_error!(
                    "eval set {} has {} feature rows but {} labels",
                    eval.name,
                    eval.features.nrows(),
                    eval.labels.len()
                ));
            }
            check_labels(eval.labels)?;
        }
        if self.params.bagging_fraction.is_some() && self.params.subsample.is_some() {
            self.note("bagging_fraction is set, subsample will be ignored");
        }

        let params = self.params.clone();
        let bins = BinnedMatrix::fit(features, params.max_bin);
        let n_rows = bins.n_rows();
        let grower_config = GrowerConfig::from(&params);

        self.init_score = init_score(labels);
        self.n_features = Some(features.ncols());
        self.trees.clear();
        self.best_iteration = None;
        self.eval_history.clear();

        let mut train_scores = vec![self.init_score; n_rows];
        let mut valid_scores = eval_set.map(|e| vec![self.init_score; e.features.nrows()]);
        let valid_labels: Vec<f64> = eval_set.map(|e| e.labels.to_vec()).unwrap_or_default();
        // Random-forest tree outputs are averaged rather than summed.
        let mut rf_train_sum = vec![0.0; n_rows];
        let mut rf_valid_sum = vec![0.0; valid_labels.len()];

        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];
        if params.boosting_type == BoostingType::Rf {
            gradients(&train_scores, labels, &mut grad, &mut hess);
        }

        let mut row_sampler = RowSampler::new(
            n_rows,
            params.effective_bagging_fraction(),
            params.bagging_freq,
            params.seed.wrapping_add(3),
        );
        let mut feature_sampler = FeatureSampler::new(
            bins.n_features(),
            params.feature_fraction,
            params.seed.wrapping_add(2),
        );
        let mut drop_rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(4));

        let mut early_stopping = match (params.early_stopping_rounds, eval_set.is_some()) {
            (Some(_), true) if params.boosting_type == BoostingType::Dart => {
                self.note("Early stopping is not available in dart mode");
                None
            }
            (Some(rounds), true) => Some(EarlyStopping::new(rounds, Auc.higher_is_better())),
            (Some(_), false) => {
                self.note("Early stopping requested without a validation set; ignored");
                None
            }
            (None, _) => None,
        };

        for iteration in 0..params.n_estimators {
            let rows = row_sampler.rows_for(iteration);
            let tree_features = feature_sampler.next_tree();

            match params.boosting_type {
                BoostingType::Gbdt => {
                    gradients(&train_scores, labels, &mut grad, &mut hess);
                    let mut tree =
                        TreeGrower::new(&grower_config, &bins, &grad, &hess).grow(rows, &tree_features);
                    if tree.num_leaves() <= 1 {
                        self.note("Stopped training because no leaf meets the split requirements");
                        break;
                    }
                    tree.weight = params.learning_rate;
                    add_contribution(&tree, tree.weight, &bins, &mut train_scores);
                    if let (Some(eval), Some(scores)) = (&eval_set, valid_scores.as_mut()) {
                        add_contribution_raw(&tree, tree.weight, eval.features, scores);
                    }
                    self.trees.push(tree);
                }
                BoostingType::Rf => {
                    let tree =
                        TreeGrower::new(&grower_config, &bins, &grad, &hess).grow(rows, &tree_features);
                    if tree.num_leaves() <= 1 {
                        self.note("Stopped training because no leaf meets the split requirements");
                        break;
                    }
                    add_contribution(&tree, 1.0, &bins, &mut rf_train_sum);
                    self.trees.push(tree);
                    let k = self.trees.len() as f64;
                    for (score, sum) in train_scores.iter_mut().zip(&rf_train_sum) {
                        *score = self.init_score + sum / k;
                    }
                    if let (Some(eval), Some(scores)) = (&eval_set, valid_scores.as_mut()) {
                        if let Some(tree) = self.trees.last() {
                            add_contribution_raw(tree, 1.0, eval.features, &mut rf_valid_sum);
                        }
                        for (score, sum) in scores.iter_mut().zip(&rf_valid_sum) {
                            *score = self.init_score + sum / k;
                        }
                    }
                }
                BoostingType::Dart => {
                    let dropped = self.select_dropped(&mut drop_rng);
                    for &t in &dropped {
                        let tree = &self.trees[t];
                        add_contribution(tree, -tree.weight, &bins, &mut train_scores);
                        if let (Some(eval), Some(scores)) = (&eval_set, valid_scores.as_mut()) {
                            add_contribution_raw(tree, -tree.weight, eval.features, scores);
                        }
                    }

                    gradients(&train_scores, labels, &mut grad, &mut hess);
                    let mut tree =
                        TreeGrower::new(&grower_config, &bins, &grad, &hess).grow(rows, &tree_features);
                    let finished = tree.num_leaves() <= 1;

                    let k = dropped.len() as f64;
                    let rescale = if finished { 1.0 } else { k / (k + 1.0) };
                    for &t in &dropped {
                        self.trees[t].weight *= rescale;
                        let tree = &self.trees[t];
                        add_contribution(tree, tree.weight, &bins, &mut train_scores);
                        if let (Some(eval), Some(scores)) = (&eval_set, valid_scores.as_mut()) {
                            add_contribution_raw(tree, tree.weight, eval.features, scores);
                        }
                    }
                    if finished {
                        self.note("Stopped training because no leaf meets the split requirements");
                        break;
                    }

                    tree.weight = params.learning_rate / (1.0 + k);
                    add_contribution(&tree, tree.weight, &bins, &mut train_scores);
                    if let (Some(eval), Some(scores)) = (&eval_set, valid_scores.as_mut()) {
                        add_contribution_raw(&tree, tree.weight, eval.features, scores);
                    }
                    self.trees.push(tree);
                }
            }

            let (Some(eval), Some(scores)) = (&eval_set, valid_scores.as_ref()) else {
                continue;
            };

            let value = Auc.evaluate(scores, &valid_labels);
            self.eval_history.push(value);
            debug!("[{}] {}'s {}: {:.6}", iteration + 1, eval.name, Auc::NAME, value);

            let record = EvalRecord {
                iteration,
                dataset: eval.name.to_string(),
                metric: Auc::NAME,
                value,
                higher_is_better: Auc.higher_is_better(),
            };
            let mut halt = false;
            for callback in callbacks.iter_mut() {
                if callback.after_iteration(&record)?.is_break() {
                    halt = true;
                }
            }

            if let Some(stopper) = early_stopping.as_mut() {
                if stopper.should_stop(value) {
                    self.best_iteration = Some(stopper.best_round() + 1);
                    self.note(&format!(
                        "Early stopping, best iteration is: [{}] {}'s {}: {:.6}",
                        stopper.best_round() + 1,
                        eval.name,
                        Auc::NAME,
                        stopper.best_value().unwrap_or(value)
                    ));
                    break;
                }
            }
            if halt {
                break;
            }
        }

        if self.best_iteration.is_none() {
            if let Some(stopper) = &early_stopping {
                if stopper.current_round() > 0 {
                    self.best_iteration = Some(stopper.best_round() + 1);
                    self.note(&format!(
                        "Did not meet early stopping. Best iteration is: [{}]",
                        stopper.best_round() + 1
                    ));
                }
            }
        }

        Ok(())
    }

    /// Trees to drop this round; none when the skip draw succeeds.
    fn select_dropped(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if self.trees.is_empty() || rng.random::<f64>() < self.params.skip_drop {
            return Vec::new();
        }
        let mut dropped: Vec<usize> = (0..self.trees.len())
            .filter(|_| rng.random::<f64>() < self.params.drop_rate)
            .collect();
        if self.params.max_drop > 0 && dropped.len() > self.params.max_drop {
            let keep = rand::seq::index::sample(rng, dropped.len(), self.params.max_drop);
            let mut limited: Vec<usize> = keep.into_iter().map(|i| dropped[i]).collect();
            limited.sort_unstable();
            dropped = limited;
        }
        dropped
    }

    fn check_input(&self, features: ArrayView2<'_, f64>) -> BtResult<()> {
        let expected = self.n_features.ok_or(TrainError::NotFitted)?;
        if features.ncols() != expected {
            return Err(TrainError::FeatureMismatch {
                expected,
                actual: features.ncols(),
            }
            .into());
        }
        Ok(())
    }

    fn raw_score_row(&self, row: ArrayView1<'_, f64>, n_trees: usize) -> f64 {
        let trees = &self.trees[..n_trees];
        match self.params.boosting_type {
            BoostingType::Rf if n_trees > 0 => {
                let sum: f64 = trees.iter().map(|t| t.leaf_value(row)).sum();
                self.init_score + sum / n_trees as f64
            }
            BoostingType::Rf => self.init_score,
            BoostingType::Gbdt | BoostingType::Dart => {
                self.init_score + trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            }
        }
    }

    /// Raw log-odds scores, using the best iteration when one is known.
    pub fn predict_raw(&self, features: ArrayView2<'_, f64>) -> BtResult<Vec<f64>> {
        self.check_input(features)?;
        let n_trees = self
            .best_iteration
            .unwrap_or(self.trees.len())
            .min(self.trees.len());
        Ok((0..features.nrows())
            .into_par_iter()
            .map(|i| self.raw_score_row(features.row(i), n_trees))
            .collect())
    }

    /// Probability of the positive class.
    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> BtResult<Vec<f64>> {
        Ok(self.predict_raw(features)?.into_iter().map(sigmoid).collect())
    }

    /// Predicted class labels (0.0 or 1.0); probability ties go to class 0.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> BtResult<Vec<f64>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| if p > 0.5 { 1.0 } else { 0.0 })
            .collect())
    }
}

/// `scores[i] += weight * tree(row i)` on the binned training matrix.
fn add_contribution(tree: &Tree, weight: f64, bins: &BinnedMatrix, scores: &mut [f64]) {
    scores
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, score)| *score += weight * tree.leaf_value_binned(bins, i));
}

/// `scores[i] += weight * tree(row i)` on raw features.
fn add_contribution_raw(tree: &Tree, weight: f64, features: ArrayView2<'_, f64>, scores: &mut [f64]) {
    for (score, row) in scores.iter_mut().zip(features.rows()) {
        *score += weight * tree.leaf_value(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::roc_auc_score;
    use bt_types::BtError;
    use bt_types::StudyError;
    use ndarray::{Array1, Array2};
    use std::ops::ControlFlow;

    /// Two informative features, label = x0 + 0.5 x1 > 0 with a few flipped rows.
    fn problem(n: usize, offset: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| {
            let k = (i + offset) as f64;
            match j {
                0 => ((k * 0.37).sin() * 2.0),
                1 => ((k * 0.11).cos() * 2.0),
                _ => ((k * 1.7) % 1.0),
            }
        });
        let y = Array1::from_shape_fn(n, |i| {
            let signal = x[[i, 0]] + 0.5 * x[[i, 1]];
            let flipped = (i + offset) % 17 == 0;
            if (signal > 0.0) != flipped {
                1.0
            } else {
                0.0
            }
        });
        (x, y)
    }

    fn quick_params(boosting_type: BoostingType) -> BoosterParams {
        BoosterParams {
            boosting_type,
            n_estimators: 30,
            num_leaves: 8,
            min_child_samples: 5,
            bagging_fraction: Some(0.8),
            bagging_freq: 1,
            feature_fraction: 0.9,
            verbosity: -1,
            ..Default::default()
        }
    }

    #[test]
    fn gbdt_learns_separable_problem() {
        let (x, y) = problem(400, 0);
        let (xv, yv) = problem(200, 1000);
        let mut model = GbdtClassifier::new(quick_params(BoostingType::Gbdt));
        model.fit(x.view(), y.view(), None, &mut []).unwrap();

        assert_eq!(model.num_trees(), 30);
        let proba = model.predict_proba(xv.view()).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        let auc = roc_auc_score(&yv.to_vec(), &proba).unwrap();
        assert!(auc > 0.85, "auc too low: {auc}");
    }

    #[test]
    fn all_boosting_types_train_and_score() {
        let (x, y) = problem(300, 0);
        let (xv, yv) = problem(120, 500);
        for boosting_type in [BoostingType::Gbdt, BoostingType::Dart, BoostingType::Rf] {
            let mut model = GbdtClassifier::new(quick_params(boosting_type));
            let eval = EvalSet::new("valid_0", xv.view(), yv.view());
            model.fit(x.view(), y.view(), Some(eval), &mut []).unwrap();
            assert!(model.num_trees() > 0, "{boosting_type} built no trees");
            assert!(!model.eval_history().is_empty());
            let auc = roc_auc_score(&yv.to_vec(), &model.predict_proba(xv.view()).unwrap()).unwrap();
            assert!(auc > 0.7, "{boosting_type} auc too low: {auc}");
        }
    }

    #[test]
    fn early_stopping_sets_best_iteration() {
        let (x, y) = problem(300, 0);
        let (xv, yv) = problem(100, 700);
        let params = BoosterParams {
            n_estimators: 500,
            learning_rate: 0.3,
            ..quick_params(BoostingType::Gbdt)
        }
        .with_early_stopping(5);
        let mut model = GbdtClassifier::new(params);
        let eval = EvalSet::new("valid_0", xv.view(), yv.view());
        model.fit(x.view(), y.view(), Some(eval), &mut []).unwrap();

        let best = model.best_iteration().unwrap();
        assert!(best >= 1);
        assert!(best <= model.num_trees());
        let history = model.eval_history();
        let best_value = history[best - 1];
        assert!(history.iter().all(|&v| v <= best_value));
    }

    #[test]
    fn dart_ignores_early_stopping() {
        let (x, y) = problem(200, 0);
        let (xv, yv) = problem(80, 300);
        let params = BoosterParams {
            n_estimators: 15,
            ..quick_params(BoostingType::Dart)
        }
        .with_early_stopping(1);
        let mut model = GbdtClassifier::new(params);
        let eval = EvalSet::new("valid_0", xv.view(), yv.view());
        model.fit(x.view(), y.view(), Some(eval), &mut []).unwrap();
        assert_eq!(model.best_iteration(), None);
        assert_eq!(model.eval_history().len(), model.num_trees());
    }

    #[test]
    fn callbacks_see_every_round_and_can_abort() {
        let (x, y) = problem(200, 0);
        let (xv, yv) = problem(80, 300);
        let mut seen = Vec::new();
        let mut abort_at_three = |record: &EvalRecord| -> BtResult<ControlFlow<()>> {
            seen.push(record.iteration);
            if record.iteration == 3 {
                return Err(StudyError::TrialPruned {
                    trial_number: 0,
                    step: record.iteration as u64,
                }
                .into());
            }
            Ok(ControlFlow::Continue(()))
        };

        let mut model = GbdtClassifier::new(quick_params(BoostingType::Gbdt));
        let eval = EvalSet::new("valid_0", xv.view(), yv.view());
        let result = model.fit(x.view(), y.view(), Some(eval), &mut [&mut abort_at_three]);
        assert!(matches!(result, Err(ref e) if e.is_pruned()));
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn callback_break_stops_gracefully() {
        let (x, y) = problem(200, 0);
        let (xv, yv) = problem(80, 300);
        let mut stop_at_four = |record: &EvalRecord| -> BtResult<ControlFlow<()>> {
            Ok(if record.iteration == 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        };
        let mut model = GbdtClassifier::new(quick_params(BoostingType::Gbdt));
        let eval = EvalSet::new("valid_0", xv.view(), yv.view());
        model
            .fit(x.view(), y.view(), Some(eval), &mut [&mut stop_at_four])
            .unwrap();
        assert_eq!(model.num_trees(), 5);
    }

    #[test]
    fn predictions_are_hard_labels() {
        let (x, y) = problem(200, 0);
        let mut model = GbdtClassifier::new(quick_params(BoostingType::Gbdt));
        model.fit(x.view(), y.view(), None, &mut []).unwrap();
        let labels = model.predict(x.view()).unwrap();
        assert!(labels.iter().all(|&l| l == 0.0 || l == 1.0));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let (x, mut y) = problem(50, 0);
        y[3] = 2.0;
        let mut model = GbdtClassifier::new(quick_params(BoostingType::Gbdt));
        let result = model.fit(x.view(), y.view(), None, &mut []);
        assert!(matches!(
            result,
            Err(BtError::Train(TrainError::InvalidLabel { value })) if value == 2.0
        ));

        let unfitted = GbdtClassifier::new(BoosterParams::default());
        assert!(matches!(
            unfitted.predict(x.view()),
            Err(BtError::Train(TrainError::NotFitted))
        ));
    }

    #[test]
    fn rf_without_sampling_fails_before_training() {
        let (x, y) = problem(50, 0);
        let params = BoosterParams {
            bagging_fraction: Some(1.0),
            feature_fraction: 1.0,
            ..quick_params(BoostingType::Rf)
        };
        let mut model = GbdtClassifier::new(params);
        assert!(model.fit(x.view(), y.view(), None, &mut []).is_err());
        assert_eq!(model.num_trees(), 0);
    }

    #[test]
    fn feature_count_checked_at_predict() {
        let (x, y) = problem(100, 0);
        let mut model = GbdtClassifier::new(quick_params(BoostingType::Gbdt));
        model.fit(x.view(), y.view(), None, &mut []).unwrap();
        let narrow = Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            model.predict(narrow.view()),
            Err(BtError::Train(TrainError::FeatureMismatch { expected: 3, actual: 2 }))
        ));
    }
}
