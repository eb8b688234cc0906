//! Parallel-autoencoder ensembles for unsupervised anomaly detection, and a
//! sweep comparing ensemble losses across ensemble widths by mean ROC-AUC.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod losses;
pub mod models;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use config::{FailurePolicy, NetworkConfig, SweepConfig, TrainConfig, WidthRange};
pub use data::{Dataset, SyntheticSpec};
pub use error::{Error, Result};
pub use experiment::{ConfigSummary, OutputPaths, RunAggregator, Sweep, SweepOutcome};
pub use losses::{LossKind, LossOutput, LossPair, Mode};
pub use models::autoencoder::ParallelAutoencoder;
pub use models::base_model::{EnsembleModel, EnsembleTrainer};
pub use models::trainer::AutoencoderTrainer;

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// A Python module implemented in Rust.
#[cfg(feature = "python")]
#[pymodule]
fn ensemble_ae(_py: Python, m: &PyModule) -> PyResult<()> {
    // Losses:
    m.add_function(wrap_pyfunction!(python::ensemble_loss, m)?)?;

    // Sweep:
    m.add_class::<python::LossSweep>()?;
    Ok(())
}
