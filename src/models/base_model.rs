use ndarray::{Array3, ArrayView2};

use crate::error::Result;
use crate::losses::LossKind;

/// A trained ensemble whose members each reconstruct the input.
pub trait EnsembleModel {
    /// Number of members, i.e. the length of the trailing output axis.
    fn width(&self) -> usize;

    /// Inference-mode reconstruction, shape `(batch, feature, member)`.
    fn reconstruct(&self, x: ArrayView2<f64>) -> Result<Array3<f64>>;
}

/// Builds and fits a fresh ensemble for one run.
pub trait EnsembleTrainer {
    type Model: EnsembleModel;

    /// Train a new model of `width` members on `x` with the given training loss.
    ///
    /// `seed` drives weight initialisation, dropout and shuffling, so two calls
    /// with the same arguments produce the same model.
    fn train(&self, width: usize, loss: LossKind, x: ArrayView2<f64>, seed: u64) -> Result<Self::Model>;
}
