//! Search driver: attach to the study and run trials until the budget is spent.

use bt_optimizer::{
    open_storage, should_halt, HyperbandPruner, ObjectiveDirection, Study, StudyStorage,
    TpeSampler, TrialRecord,
};
use bt_types::{BtError, BtResult, StudyError};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::info;

use crate::config::TunerConfig;
use crate::objective::ObjectiveEvaluator;
use crate::params::search_space;
use crate::progress::ProgressBar;

/// Printed once a search run returns successfully.
pub const COMPLETION_MESSAGE: &str = "Optimization completed!";

/// Outcome of one driver run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub trials_run: usize,
    pub best_trial: Option<TrialRecord>,
}

pub struct SearchDriver {
    config: TunerConfig,
}

impl SearchDriver {
    pub fn new(config: TunerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Load the configured study with the TPE sampler and Hyperband pruner.
    pub fn load_study(&self, storage: Arc<dyn StudyStorage>) -> BtResult<Study> {
        let sampler = match self.config.seed {
            Some(seed) => TpeSampler::new().with_seed(seed),
            None => TpeSampler::new(),
        };
        let study = Study::load(
            storage,
            &self.config.study_name,
            Box::new(sampler),
            Box::new(HyperbandPruner::new(1, 3)),
        )?;
        Ok(study.with_failure_policy(self.config.failure_policy))
    }

    /// Open the configured storage and run the search.
    pub fn run(&self) -> BtResult<RunSummary> {
        self.config.validate()?;
        let storage = open_storage(&self.config.storage_url)?;
        self.run_with_storage(storage)
    }

    pub fn run_with_storage(&self, storage: Arc<dyn StudyStorage>) -> BtResult<RunSummary> {
        let mut study = self.load_study(storage)?;
        let evaluator = ObjectiveEvaluator::from_config(&self.config)?;
        let space = search_space();
        let budget = self.config.n_trials;
        let maximize = study.direction() == ObjectiveDirection::Maximize;

        info!(
            "Optimizing study {} for up to {budget} trials (data {})",
            study.name(),
            self.config.data_path.display()
        );

        let mut progress = ProgressBar::stderr(budget, self.config.show_progress);
        let result = study.optimize(
            &space,
            budget,
            |trial| evaluator.evaluate_trial(trial),
            |_, record| {
                progress.update(record, maximize);
                if should_halt(record.number, budget) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );
        progress.finish();
        result?;

        let best_trial = match study.best_trial() {
            Ok(best) => Some(best),
            Err(BtError::Study(StudyError::NoCompletedTrials { .. })) => None,
            Err(e) => return Err(e),
        };
        Ok(RunSummary {
            trials_run: progress.done(),
            best_trial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_data::DatasetBundle;
    use bt_optimizer::{
        DuckDbStorage, FailurePolicy, InMemoryStorage, RungRecord, StudySummary, TrialState,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// In-memory storage whose full trial reads fail after `healthy_reads`.
    struct FlakyStorage {
        inner: InMemoryStorage,
        healthy_reads: usize,
        reads: AtomicUsize,
    }

    impl StudyStorage for FlakyStorage {
        fn create_study(&self, name: &str, direction: ObjectiveDirection) -> BtResult<StudySummary> {
            self.inner.create_study(name, direction)
        }

        fn get_study(&self, name: &str) -> BtResult<Option<StudySummary>> {
            self.inner.get_study(name)
        }

        fn list_studies(&self) -> BtResult<Vec<StudySummary>> {
            self.inner.list_studies()
        }

        fn create_trial(&self, study_id: &Uuid) -> BtResult<TrialRecord> {
            self.inner.create_trial(study_id)
        }

        fn update_trial(&self, trial: &TrialRecord) -> BtResult<()> {
            self.inner.update_trial(trial)
        }

        fn get_trials(&self, study_id: &Uuid) -> BtResult<Vec<TrialRecord>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) >= self.healthy_reads {
                return Err(StudyError::QueryFailed {
                    query: "SELECT trials".into(),
                    error: "connection reset".into(),
                }
                .into());
            }
            self.inner.get_trials(study_id)
        }

        fn get_rung_records(&self, study_id: &Uuid) -> BtResult<Vec<RungRecord>> {
            self.inner.get_rung_records(study_id)
        }

        fn backend(&self) -> &str {
            "flaky"
        }
    }

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("complete_data.npz");
        DatasetBundle::synthetic(300, 4, 11)
            .unwrap()
            .write_npz(&data)
            .unwrap();
        (dir, data)
    }

    fn config(data: PathBuf, storage_url: String, n_trials: usize) -> TunerConfig {
        TunerConfig::new()
            .with_data_path(data)
            .with_storage_url(storage_url)
            .with_study_name("LightGBM_study_mysql")
            .with_n_trials(n_trials)
            .with_seed(5)
            .with_progress(false)
    }

    #[test]
    fn missing_study_fails_before_any_trial() {
        let (dir, data) = fixture();
        let db = dir.path().join("empty.duckdb");
        let driver = SearchDriver::new(config(data, format!("duckdb://{}", db.display()), 3));

        let result = driver.run();
        assert!(matches!(
            result,
            Err(BtError::Study(StudyError::NotFound { ref study_name }))
                if study_name == "LightGBM_study_mysql"
        ));

        let storage = DuckDbStorage::open(&db).unwrap();
        assert!(storage.list_studies().unwrap().is_empty());
    }

    #[test]
    fn one_trial_budget_records_exactly_one_trial() {
        let (dir, data) = fixture();
        let db = dir.path().join("optuna.duckdb");
        {
            let storage = DuckDbStorage::open(&db).unwrap();
            storage
                .create_study("LightGBM_study_mysql", ObjectiveDirection::Maximize)
                .unwrap();
        }

        let driver = SearchDriver::new(config(data, format!("duckdb://{}", db.display()), 1));
        let summary = driver.run().unwrap();
        assert_eq!(summary.trials_run, 1);

        let storage = DuckDbStorage::open(&db).unwrap();
        let study = storage.get_study("LightGBM_study_mysql").unwrap().unwrap();
        let trials = storage.get_trials(&study.id).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].number, 0);
        assert!(trials[0].state.is_finished());
        if trials[0].state == TrialState::Complete {
            let value = trials[0].value.unwrap();
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn halts_once_study_number_reaches_budget() {
        let (_dir, data) = fixture();
        let storage: Arc<dyn StudyStorage> = Arc::new(InMemoryStorage::new());
        storage
            .create_study("LightGBM_study_mysql", ObjectiveDirection::Maximize)
            .unwrap();

        let driver = SearchDriver::new(config(data, "memory://".into(), 2).with_reuse_data(true));
        assert_eq!(driver.run_with_storage(storage.clone()).unwrap().trials_run, 2);

        // Trial numbers already exceed the budget, so the next run stops after one trial.
        let again = driver.run_with_storage(storage.clone()).unwrap();
        assert_eq!(again.trials_run, 1);

        let study = storage.get_study("LightGBM_study_mysql").unwrap().unwrap();
        let numbers: Vec<usize> = storage
            .get_trials(&study.id)
            .unwrap()
            .iter()
            .map(|t| t.number)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn run_without_completed_trials_has_no_best_trial() {
        let storage: Arc<dyn StudyStorage> = Arc::new(InMemoryStorage::new());
        storage
            .create_study("LightGBM_study_mysql", ObjectiveDirection::Maximize)
            .unwrap();

        // Every trial fails to read the bundle and the policy keeps going.
        let driver = SearchDriver::new(
            config(PathBuf::from("/nonexistent/complete_data.npz"), "memory://".into(), 2)
                .with_failure_policy(FailurePolicy::Continue),
        );
        let summary = driver.run_with_storage(storage).unwrap();
        assert_eq!(summary.trials_run, 2);
        assert!(summary.best_trial.is_none());
    }

    #[test]
    fn storage_errors_after_the_search_are_returned() {
        let storage = Arc::new(FlakyStorage {
            inner: InMemoryStorage::new(),
            healthy_reads: 1,
            reads: AtomicUsize::new(0),
        });
        storage
            .create_study("LightGBM_study_mysql", ObjectiveDirection::Maximize)
            .unwrap();

        // The single trial reads its sampling history, fails on the missing
        // bundle, and the best-trial lookup is the next read.
        let driver = SearchDriver::new(
            config(PathBuf::from("/nonexistent/complete_data.npz"), "memory://".into(), 1)
                .with_failure_policy(FailurePolicy::Continue),
        );
        let result = driver.run_with_storage(storage);
        assert!(matches!(
            result,
            Err(BtError::Study(StudyError::QueryFailed { .. }))
        ));
    }
}
