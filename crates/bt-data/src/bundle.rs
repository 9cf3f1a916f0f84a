use std::fs::File;
use std::path::Path;

use bt_types::{BtResult, DataError};
use ndarray::{Array, Array1, Array2, Dimension, Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};
use num_traits::AsPrimitive;

/// Array names inside the bundle, in the order the archive is conventionally written.
pub const ARRAY_NAMES: [&str; 8] = [
    "X_train",
    "X_test",
    "y_train",
    "y_test",
    "X_val_early_stop",
    "X_val_tune",
    "y_val_early_stop",
    "y_val_tune",
];

/// Split names in documented order: (train), (test), (early-stop validation), (tuning validation).
pub const SPLIT_NAMES: [&str; 4] = ["train", "test", "val_early_stop", "val_tune"];

/// One feature matrix with its label vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
}

impl Split {
    /// Pair features with labels; the sample counts must agree.
    pub fn new(name: &str, features: Array2<f64>, labels: Array1<f64>) -> BtResult<Self> {
        if features.nrows() != labels.len() {
            return Err(DataError::ShapeMismatch {
                split: name.to_string(),
                features: features.nrows(),
                labels: labels.len(),
            }
            .into());
        }
        Ok(Self { features, labels })
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// The full dataset bundle consumed by the objective evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetBundle {
    pub train: Split,
    pub test: Split,
    pub val_early_stop: Split,
    pub val_tune: Split,
}

impl DatasetBundle {
    /// Assemble a bundle; every split must carry the same number of features.
    pub fn new(train: Split, test: Split, val_early_stop: Split, val_tune: Split) -> BtResult<Self> {
        let bundle = Self {
            train,
            test,
            val_early_stop,
            val_tune,
        };
        let expected = bundle.train.n_features();
        for (name, split) in bundle.splits() {
            if split.n_features() != expected {
                return Err(DataError::InvalidFormat {
                    message: format!(
                        "split {name} has {} features, train has {expected}",
                        split.n_features()
                    ),
                }
                .into());
            }
        }
        Ok(bundle)
    }

    /// Splits in documented order.
    pub fn splits(&self) -> [(&'static str, &Split); 4] {
        [
            (SPLIT_NAMES[0], &self.train),
            (SPLIT_NAMES[1], &self.test),
            (SPLIT_NAMES[2], &self.val_early_stop),
            (SPLIT_NAMES[3], &self.val_tune),
        ]
    }

    pub fn n_features(&self) -> usize {
        self.train.n_features()
    }

    /// Read the eight named arrays from an `.npz` archive.
    pub fn load_npz<P: AsRef<Path>>(path: P) -> BtResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading dataset bundle from: {}", path.display());

        if !path.exists() {
            return Err(DataError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let file = File::open(path)?;
        let mut npz = NpzReader::new(file).map_err(|e| DataError::LoadingFailed {
            message: format!("Failed to open archive {}: {}", path.display(), e),
        })?;

        let available: Vec<String> = npz
            .names()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to list arrays in {}: {}", path.display(), e),
            })?
            .into_iter()
            .map(|name| name.trim_end_matches(".npy").to_string())
            .collect();
        for name in ARRAY_NAMES {
            if !available.iter().any(|a| a == name) {
                return Err(DataError::MissingArray {
                    name: name.to_string(),
                }
                .into());
            }
        }

        let train = Split::new(
            "train",
            read_widened::<Ix2>(&mut npz, "X_train")?,
            read_widened::<Ix1>(&mut npz, "y_train")?,
        )?;
        let test = Split::new(
            "test",
            read_widened::<Ix2>(&mut npz, "X_test")?,
            read_widened::<Ix1>(&mut npz, "y_test")?,
        )?;
        let val_early_stop = Split::new(
            "val_early_stop",
            read_widened::<Ix2>(&mut npz, "X_val_early_stop")?,
            read_widened::<Ix1>(&mut npz, "y_val_early_stop")?,
        )?;
        let val_tune = Split::new(
            "val_tune",
            read_widened::<Ix2>(&mut npz, "X_val_tune")?,
            read_widened::<Ix1>(&mut npz, "y_val_tune")?,
        )?;

        let bundle = Self::new(train, test, val_early_stop, val_tune)?;
        tracing::debug!(
            "Loaded bundle: {} train / {} test / {} early-stop / {} tune rows, {} features",
            bundle.train.n_samples(),
            bundle.test.n_samples(),
            bundle.val_early_stop.n_samples(),
            bundle.val_tune.n_samples(),
            bundle.n_features()
        );
        Ok(bundle)
    }

    /// Write the bundle as a compressed `.npz` archive with the standard array names.
    pub fn write_npz<P: AsRef<Path>>(&self, path: P) -> BtResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        let mut npz = NpzWriter::new_compressed(file);
        let write_err = |e: ndarray_npy::WriteNpzError| DataError::WritingFailed {
            message: format!("{}: {}", path.display(), e),
        };

        npz.add_array("X_train", &self.train.features).map_err(write_err)?;
        npz.add_array("X_test", &self.test.features).map_err(write_err)?;
        npz.add_array("y_train", &self.train.labels).map_err(write_err)?;
        npz.add_array("y_test", &self.test.labels).map_err(write_err)?;
        npz.add_array("X_val_early_stop", &self.val_early_stop.features)
            .map_err(write_err)?;
        npz.add_array("X_val_tune", &self.val_tune.features).map_err(write_err)?;
        npz.add_array("y_val_early_stop", &self.val_early_stop.labels)
            .map_err(write_err)?;
        npz.add_array("y_val_tune", &self.val_tune.labels).map_err(write_err)?;
        npz.finish().map_err(write_err)?;

        tracing::info!("Wrote dataset bundle to {}", path.display());
        Ok(())
    }
}

fn try_read<T, D>(npz: &mut NpzReader<File>, name: &str) -> Option<Array<f64, D>>
where
    T: ReadableElement + AsPrimitive<f64>,
    D: Dimension,
{
    npz.by_name::<OwnedRepr<T>, D>(name)
        .ok()
        .map(|array| array.mapv(|v| v.as_()))
}

/// Read an array of any supported numeric dtype and widen it to `f64`.
fn read_widened<D: Dimension>(npz: &mut NpzReader<File>, name: &str) -> BtResult<Array<f64, D>> {
    let widened = try_read::<f64, D>(npz, name)
        .or_else(|| try_read::<f32, D>(npz, name))
        .or_else(|| try_read::<i64, D>(npz, name))
        .or_else(|| try_read::<i32, D>(npz, name))
        .or_else(|| try_read::<u8, D>(npz, name))
        .or_else(|| {
            npz.by_name::<OwnedRepr<bool>, D>(name)
                .ok()
                .map(|array| array.mapv(|v| if v { 1.0 } else { 0.0 }))
        });

    widened.ok_or_else(|| {
        DataError::InvalidFormat {
            message: format!(
                "array {name} has an unsupported dtype or is not {}-dimensional",
                D::NDIM.unwrap_or(0)
            ),
        }
        .into()
    })
}
