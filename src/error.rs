//! Error types for the ensemble sweep.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading data, training, scoring or persisting results.
#[derive(Debug, Error)]
pub enum Error {
    /// The dataset archive does not contain a required array.
    #[error("dataset {path}: missing array '{name}'")]
    MissingArray { path: PathBuf, name: String },

    /// Input values are unusable (empty, non-finite, non-binary labels, ...).
    #[error("invalid data: {reason}")]
    InvalidData { reason: String },

    /// Two arrays that must agree on a dimension do not.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// ROC-AUC requested against a label set with a single class.
    #[error("ROC-AUC is undefined: every test label is {class}")]
    DegenerateLabels { class: u8 },

    /// Training produced a non-finite loss.
    #[error("training diverged at epoch {epoch}: loss is {value}")]
    Diverged { epoch: usize, value: f64 },

    /// Rejected before any training starts.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npz read error: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    #[error("npy write error: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("npz write error: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("plot error: {0}")]
    Plot(String),
}

impl Error {
    #[must_use]
    pub fn invalid_data(reason: impl Into<String>) -> Self {
        Self::InvalidData {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error belongs to the configuration class (raised before training).
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
