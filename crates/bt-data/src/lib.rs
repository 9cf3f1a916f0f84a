//! # bt-data
//!
//! Loading and writing of the eight-array `.npz` dataset bundle that feeds
//! every tuning trial, plus a deterministic synthetic bundle for smoke runs.

pub mod bundle;
pub mod synthetic;

pub use bundle::{DatasetBundle, Split, ARRAY_NAMES, SPLIT_NAMES};
