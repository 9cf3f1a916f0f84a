use thiserror::Error;

/// Main error type for Boostune
#[derive(Error, Debug)]
pub enum BtError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Training error: {0}")]
    Train(#[from] TrainError),

    #[error("Study error: {0}")]
    Study(#[from] StudyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl BtError {
    /// True when this error is the pruning signal raised from inside an objective.
    pub fn is_pruned(&self) -> bool {
        matches!(self, BtError::Study(StudyError::TrialPruned { .. }))
    }
}

/// Dataset bundle errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Dataset file not found: {path}")]
    FileNotFound { path: String },

    #[error("Array missing from bundle: {name}")]
    MissingArray { name: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Sample count mismatch in split {split}: {features} feature rows, {labels} labels")]
    ShapeMismatch {
        split: String,
        features: usize,
        labels: usize,
    },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data writing failed: {message}")]
    WritingFailed { message: String },
}

/// Booster training errors
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Invalid label {value}: binary objective expects 0 or 1")]
    InvalidLabel { value: f64 },

    #[error("Training set is empty")]
    EmptyDataset,

    #[error("Feature count mismatch: model has {expected}, input has {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Metric error: {message}")]
    Metric { message: String },
}

/// Study, trial and storage errors
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Study not found: {study_name}")]
    NotFound { study_name: String },

    #[error("Study already exists: {study_name}")]
    AlreadyExists { study_name: String },

    #[error("Trial {trial_number} pruned at step {step}")]
    TrialPruned { trial_number: usize, step: u64 },

    #[error("Trial not found: {trial_id}")]
    TrialNotFound { trial_id: String },

    #[error("No completed trials in study {study_name}")]
    NoCompletedTrials { study_name: String },

    #[error("Unsupported storage URL: {url}")]
    UnsupportedStorage { url: String },

    #[error("Database connection failed: {message}")]
    DatabaseConnection { message: String },

    #[error("Query execution failed: {query}, error: {error}")]
    QueryFailed { query: String, error: String },

    #[error("Corrupt study record: {message}")]
    Corruption { message: String },
}

/// Result type alias for Boostune operations
pub type BtResult<T> = Result<T, BtError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::BtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::BtError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::ShapeMismatch {
            split: "train".to_string(),
            features: 100,
            labels: 99,
        };

        assert!(error.to_string().contains("train"));
        assert!(error.to_string().contains("100"));
        assert!(error.to_string().contains("99"));
    }

    #[test]
    fn test_error_conversion() {
        let study_error = StudyError::NotFound {
            study_name: "missing".to_string(),
        };
        let bt_error: BtError = study_error.into();

        match bt_error {
            BtError::Study(StudyError::NotFound { .. }) => (),
            _ => panic!("Expected Study error"),
        }
    }

    #[test]
    fn pruned_signal_is_recognised() {
        let pruned: BtError = StudyError::TrialPruned {
            trial_number: 3,
            step: 7,
        }
        .into();
        assert!(pruned.is_pruned());

        let other: BtError = TrainError::EmptyDataset.into();
        assert!(!other.is_pruned());
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, BtError::Validation(_)));
        let config_err = config_error!("Missing required field: {}", "study");
        assert!(config_err.to_string().contains("study"));
    }
}
