//! Mean-squared reconstruction errors.
//!
//! Inputs are member-major residuals `r = q - a` of shape `(member, batch, feature)`.

use ndarray::{Array1, Array2, Array3, Axis};

/// Mean over every member, example and feature of `r^2`.
pub(super) fn member(r: &Array3<f64>) -> f64 {
    r.iter().map(|v| v * v).sum::<f64>() / r.len() as f64
}

/// Per example: mean over members and features of `r^2`.
pub(super) fn member_scores(r: &Array3<f64>) -> Array1<f64> {
    let (members, _, features) = r.dim();
    let sq = r.mapv(|v| v * v);
    sq.sum_axis(Axis(0)).sum_axis(Axis(1)) / (members * features) as f64
}

/// Residual of the member average, `mean_m(q) - a`, shape `(batch, feature)`.
fn consensus_residual(r: &Array3<f64>) -> Array2<f64> {
    let members = r.len_of(Axis(0)) as f64;
    r.sum_axis(Axis(0)) / members
}

/// Mean over examples and features of the squared consensus residual.
pub(super) fn consensus(r: &Array3<f64>) -> f64 {
    let c = consensus_residual(r);
    c.iter().map(|v| v * v).sum::<f64>() / c.len() as f64
}

/// Per example: mean over features of the squared consensus residual.
pub(super) fn consensus_scores(r: &Array3<f64>) -> Array1<f64> {
    let c = consensus_residual(r);
    let features = c.ncols() as f64;
    c.mapv(|v| v * v).sum_axis(Axis(1)) / features
}
