//! Objective evaluation: train one classifier for a proposal and score it.

use bt_boost::{roc_auc_score, Auc, EvalRecord, EvalSet, GbdtClassifier, TrainingCallback};
use bt_data::DatasetBundle;
use bt_optimizer::Trial;
use bt_types::{config_error, BtResult};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::TunerConfig;
use crate::params::HyperParams;

/// Where each evaluation gets its dataset bundle.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Read the `.npz` file again on every evaluation.
    Reload(PathBuf),
    /// One immutable bundle shared by all evaluations.
    Shared(Arc<DatasetBundle>),
}

impl DataSource {
    pub fn bundle(&self) -> BtResult<Arc<DatasetBundle>> {
        match self {
            DataSource::Reload(path) => Ok(Arc::new(DatasetBundle::load_npz(path)?)),
            DataSource::Shared(bundle) => Ok(Arc::clone(bundle)),
        }
    }
}

/// Reports every evaluation of `metric` to the trial and raises the pruning
/// signal when the pruner says so.
pub struct PruningCallback<'t, 's> {
    trial: &'t mut Trial<'s>,
    metric: &'static str,
}

impl<'t, 's> PruningCallback<'t, 's> {
    pub fn new(trial: &'t mut Trial<'s>, metric: &'static str) -> Self {
        Self { trial, metric }
    }
}

impl TrainingCallback for PruningCallback<'_, '_> {
    fn after_iteration(&mut self, record: &EvalRecord) -> BtResult<ControlFlow<()>> {
        if record.metric != self.metric {
            return Err(config_error!(
                "pruning metric {} not produced by training (saw {})",
                self.metric,
                record.metric
            ));
        }
        self.trial.report(record.iteration as u64, record.value)?;
        if self.trial.should_prune()? {
            return Err(self.trial.pruned_error());
        }
        Ok(ControlFlow::Continue(()))
    }
}

#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    source: DataSource,
    early_stopping_rounds: usize,
    seed: u64,
}

impl ObjectiveEvaluator {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            early_stopping_rounds: crate::config::DEFAULT_EARLY_STOPPING_ROUNDS,
            seed: 0,
        }
    }

    /// Evaluator for `config`; loads the bundle up front when it is shared.
    pub fn from_config(config: &TunerConfig) -> BtResult<Self> {
        let source = if config.reuse_data {
            DataSource::Shared(Arc::new(DatasetBundle::load_npz(&config.data_path)?))
        } else {
            DataSource::Reload(config.data_path.clone())
        };
        Ok(Self::new(source)
            .with_early_stopping_rounds(config.early_stopping_rounds)
            .with_seed(config.seed.unwrap_or(0)))
    }

    pub fn with_early_stopping_rounds(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = rounds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Train on `train`, monitor `val_early_stop`, score hard-label
    /// predictions on `val_tune` by ROC AUC.
    pub fn evaluate(
        &self,
        params: &HyperParams,
        callbacks: &mut [&mut dyn TrainingCallback],
    ) -> BtResult<f64> {
        params.validate()?;
        let data = self.source.bundle()?;

        let mut model =
            GbdtClassifier::new(params.to_booster_params(self.early_stopping_rounds, self.seed));
        let eval_set = EvalSet::new(
            "valid_0",
            data.val_early_stop.features.view(),
            data.val_early_stop.labels.view(),
        );
        model.fit(
            data.train.features.view(),
            data.train.labels.view(),
            Some(eval_set),
            callbacks,
        )?;

        let predicted = model.predict(data.val_tune.features.view())?;
        let auc = roc_auc_score(&data.val_tune.labels.to_vec(), &predicted)?;
        debug!(
            "{} trees (best iteration {:?}), tuning AUC {auc:.6}",
            model.num_trees(),
            model.best_iteration()
        );
        Ok(auc)
    }

    /// Objective body for one study trial.
    pub fn evaluate_trial(&self, trial: &mut Trial<'_>) -> BtResult<f64> {
        let params = HyperParams::from_params(trial.params())?;
        let mut pruning = PruningCallback::new(trial, Auc::NAME);
        self.evaluate(&params, &mut [&mut pruning])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::mid_domain;
    use crate::params::search_space;
    use bt_boost::BoostingType;
    use bt_optimizer::{
        HyperbandPruner, InMemoryStorage, ObjectiveDirection, RandomSampler, Sampler, Study,
        StudyStorage, TrialState,
    };
    use bt_types::{BtError, DataError};

    fn synthetic_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("complete_data.npz");
        DatasetBundle::synthetic(400, 5, 3)
            .unwrap()
            .write_npz(&path)
            .unwrap();
        (dir, path)
    }

    #[test]
    fn in_domain_proposals_score_between_zero_and_one() {
        let (_dir, path) = synthetic_file();
        let evaluator = ObjectiveEvaluator::new(DataSource::Reload(path));

        for boosting_type in [BoostingType::Gbdt, BoostingType::Dart, BoostingType::Rf] {
            let params = HyperParams {
                boosting_type,
                ..mid_domain()
            };
            let auc = evaluator.evaluate(&params, &mut []).unwrap();
            assert!((0.0..=1.0).contains(&auc), "{boosting_type}: {auc}");
        }
    }

    #[test]
    fn sampled_proposals_evaluate_cleanly() {
        let (_dir, path) = synthetic_file();
        let bundle = Arc::new(DatasetBundle::load_npz(&path).unwrap());
        let evaluator = ObjectiveEvaluator::new(DataSource::Shared(bundle));
        let space = search_space();
        let mut sampler = RandomSampler::with_seed(21);

        for _ in 0..3 {
            let mut sampled = sampler.sample(&space, &[], ObjectiveDirection::Maximize);
            // Keep the run short; every other value stays as sampled.
            sampled.insert("n_estimators".into(), bt_optimizer::ParameterValue::Int(50));
            let params = HyperParams::from_params(&sampled).unwrap();
            let auc = evaluator.evaluate(&params, &mut []).unwrap();
            assert!((0.0..=1.0).contains(&auc));
        }
    }

    #[test]
    fn out_of_domain_proposal_fails_before_training() {
        let evaluator = ObjectiveEvaluator::new(DataSource::Reload(PathBuf::from("/nonexistent.npz")));
        let params = HyperParams {
            max_depth: 0,
            ..mid_domain()
        };
        // Validation runs first, so the missing file is never touched.
        assert!(matches!(
            evaluator.evaluate(&params, &mut []),
            Err(BtError::Validation(_))
        ));
    }

    #[test]
    fn missing_data_file_is_reported() {
        let evaluator = ObjectiveEvaluator::new(DataSource::Reload(PathBuf::from("/nonexistent.npz")));
        assert!(matches!(
            evaluator.evaluate(&mid_domain(), &mut []),
            Err(BtError::Data(DataError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn trials_report_every_round_to_the_study() {
        let (_dir, path) = synthetic_file();
        let evaluator = ObjectiveEvaluator::new(DataSource::Reload(path));
        let storage: Arc<dyn StudyStorage> = Arc::new(InMemoryStorage::new());
        let mut study = Study::create(
            storage,
            "objective",
            ObjectiveDirection::Maximize,
            Box::new(RandomSampler::with_seed(2)),
            Box::new(HyperbandPruner::default()),
        )
        .unwrap();

        let fixed = mid_domain().to_params();
        let space = bt_optimizer::SearchSpace::new();
        study
            .optimize(
                &space,
                1,
                |trial| {
                    let params = HyperParams::from_params(&fixed)?;
                    let mut pruning = PruningCallback::new(trial, Auc::NAME);
                    evaluator.evaluate(&params, &mut [&mut pruning])
                },
                |_, _| ControlFlow::Continue(()),
            )
            .unwrap();

        let trials = study.trials().unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].state, TrialState::Complete);
        assert!(!trials[0].intermediate_values.is_empty());
        assert_eq!(trials[0].intermediate_values.keys().next(), Some(&0));
    }
}
