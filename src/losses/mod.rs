//! Reconstruction losses computed jointly over every ensemble member.
//!
//! All variants take the reference input `(batch, feature)` and the ensemble
//! output tensor `(batch, feature, member)`. The member axis is moved to the
//! front by [`member_major`] before anything is compared, so every variant
//! works on the same `(member, batch, feature)` residual tensor.
//!
//! Each variant has two reductions selected by [`Mode`]:
//! - [`Mode::Training`]: a single scalar. [`LossKind::training_graph`] builds the
//!   same value as a candle graph so the trainer can differentiate it.
//! - [`Mode::Prediction`]: one anomaly score per example.

mod graph;
mod max_mse;
mod mse;
mod pairwise;

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array3, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which reduction a loss call should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Reduce to one scalar.
    Training,
    /// Reduce to one value per example.
    Prediction,
}

/// Output of a loss evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum LossOutput {
    Scalar(f64),
    PerExample(Array1<f64>),
}

impl LossOutput {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            LossOutput::Scalar(v) => Some(*v),
            LossOutput::PerExample(_) => None,
        }
    }

    pub fn per_example(&self) -> Option<&Array1<f64>> {
        match self {
            LossOutput::Scalar(_) => None,
            LossOutput::PerExample(v) => Some(v),
        }
    }
}

/// The loss variants studied by the sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Squared residual of every member, averaged over members and features.
    MemberMse,
    /// Plain MSE of the consensus: members are averaged first, then compared.
    ConsensusMse,
    /// Per-member MSE over features, worst member per example.
    MaxMse,
    /// Squared deviation of the ensemble mean output from the reference.
    MeanBias,
    /// Mean absolute co-movement of member residuals over all unordered pairs.
    PairwiseResidual,
    /// Pairwise products of per-example member errors, summed over pairs.
    PairwiseReduced,
}

impl LossKind {
    pub const ALL: [LossKind; 6] = [
        LossKind::MemberMse,
        LossKind::ConsensusMse,
        LossKind::MaxMse,
        LossKind::MeanBias,
        LossKind::PairwiseResidual,
        LossKind::PairwiseReduced,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LossKind::MemberMse => "member_mse",
            LossKind::ConsensusMse => "consensus_mse",
            LossKind::MaxMse => "max_mse",
            LossKind::MeanBias => "mean_bias",
            LossKind::PairwiseResidual => "pairwise_residual",
            LossKind::PairwiseReduced => "pairwise_reduced",
        }
    }

    pub fn is_pairwise(&self) -> bool {
        matches!(self, LossKind::PairwiseResidual | LossKind::PairwiseReduced)
    }

    /// Smallest ensemble width for which the loss is defined.
    pub fn min_width(&self) -> usize {
        if self.is_pairwise() {
            2
        } else {
            1
        }
    }

    pub fn validate_width(&self, width: usize) -> Result<()> {
        if width < self.min_width() {
            return Err(Error::config(format!(
                "{} needs an ensemble width of at least {}, got {}",
                self.name(),
                self.min_width(),
                width
            )));
        }
        Ok(())
    }

    /// Evaluate the loss with the reduction selected by `mode`.
    pub fn evaluate(
        &self,
        reference: ArrayView2<f64>,
        outputs: ArrayView3<f64>,
        mode: Mode,
    ) -> Result<LossOutput> {
        let r = self.residuals_checked(reference, outputs)?;
        Ok(match mode {
            Mode::Training => LossOutput::Scalar(self.scalar(&r)),
            Mode::Prediction => LossOutput::PerExample(self.scores(&r)),
        })
    }

    pub fn training_loss(&self, reference: ArrayView2<f64>, outputs: ArrayView3<f64>) -> Result<f64> {
        let r = self.residuals_checked(reference, outputs)?;
        Ok(self.scalar(&r))
    }

    pub fn prediction_scores(
        &self,
        reference: ArrayView2<f64>,
        outputs: ArrayView3<f64>,
    ) -> Result<Array1<f64>> {
        let r = self.residuals_checked(reference, outputs)?;
        Ok(self.scores(&r))
    }

    fn scalar(&self, r: &Array3<f64>) -> f64 {
        match self {
            LossKind::MemberMse => mse::member(r),
            LossKind::ConsensusMse | LossKind::MeanBias => mse::consensus(r),
            LossKind::MaxMse => max_mse::worst_member(r),
            LossKind::PairwiseResidual => pairwise::residual(r),
            LossKind::PairwiseReduced => pairwise::reduced(r),
        }
    }

    fn scores(&self, r: &Array3<f64>) -> Array1<f64> {
        match self {
            LossKind::MemberMse => mse::member_scores(r),
            LossKind::ConsensusMse | LossKind::MeanBias => mse::consensus_scores(r),
            LossKind::MaxMse => max_mse::worst_member_scores(r),
            LossKind::PairwiseResidual => pairwise::residual_scores(r),
            LossKind::PairwiseReduced => pairwise::reduced_scores(r),
        }
    }

    fn residuals_checked(
        &self,
        reference: ArrayView2<f64>,
        outputs: ArrayView3<f64>,
    ) -> Result<Array3<f64>> {
        self.check_dims(reference.dim(), outputs.dim())?;
        Ok(residuals(reference, outputs))
    }

    fn check_dims(&self, reference: (usize, usize), outputs: (usize, usize, usize)) -> Result<()> {
        let (batch, features, members) = outputs;
        if reference != (batch, features) {
            return Err(Error::shape_mismatch(
                format!("reference of shape ({}, {})", batch, features),
                format!("{:?}", reference),
            ));
        }
        if batch == 0 || features == 0 {
            return Err(Error::invalid_data("loss called on an empty batch"));
        }
        self.validate_width(members)
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LossKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::config(format!("unknown loss '{}'", s)))
    }
}

/// A training loss paired with the loss used to score the trained model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LossPair {
    pub train: LossKind,
    pub predict: LossKind,
}

impl LossPair {
    pub fn new(train: LossKind, predict: LossKind) -> Self {
        LossPair { train, predict }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.train, self.predict)
    }

    pub fn min_width(&self) -> usize {
        self.train.min_width().max(self.predict.min_width())
    }

    /// The seven default pairings, in results-matrix column order.
    pub fn default_set() -> Vec<LossPair> {
        use LossKind::*;
        vec![
            LossPair::new(MemberMse, ConsensusMse),
            LossPair::new(MemberMse, MemberMse),
            LossPair::new(MaxMse, MaxMse),
            LossPair::new(MaxMse, ConsensusMse),
            LossPair::new(MeanBias, ConsensusMse),
            LossPair::new(PairwiseResidual, ConsensusMse),
            LossPair::new(PairwiseReduced, ConsensusMse),
        ]
    }
}

impl fmt::Display for LossPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.train, self.predict)
    }
}

/// View `(batch, feature, member)` as `(member, batch, feature)`.
pub fn member_major(outputs: ArrayView3<'_, f64>) -> ArrayView3<'_, f64> {
    outputs.permuted_axes([2, 0, 1])
}

/// Member-major residuals `q - a`, with the reference broadcast over members.
fn residuals(reference: ArrayView2<f64>, outputs: ArrayView3<f64>) -> Array3<f64> {
    let q = member_major(outputs);
    &q - &reference
}
