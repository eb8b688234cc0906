//! Worst-member reconstruction error.

use ndarray::{Array1, Array2, Array3, Axis};

/// Per-member MSE over features, shape `(member, batch)`.
fn member_errors(r: &Array3<f64>) -> Array2<f64> {
    let features = r.len_of(Axis(2)) as f64;
    r.mapv(|v| v * v).sum_axis(Axis(2)) / features
}

/// Index and value of the largest error per example.
///
/// The first maximum wins on ties. NaN is treated as the largest value so a
/// diverged member is never hidden.
pub(super) fn worst(errors: &Array2<f64>) -> Vec<(usize, f64)> {
    errors
        .axis_iter(Axis(1))
        .map(|column| {
            let mut best = (0, column[0]);
            for (m, &e) in column.iter().enumerate().skip(1) {
                if best.1.is_nan() {
                    break;
                }
                if e > best.1 || e.is_nan() {
                    best = (m, e);
                }
            }
            best
        })
        .collect()
}

pub(super) fn worst_member_scores(r: &Array3<f64>) -> Array1<f64> {
    worst(&member_errors(r)).into_iter().map(|(_, e)| e).collect()
}

/// Mean over examples of the worst member's error.
pub(super) fn worst_member(r: &Array3<f64>) -> f64 {
    let scores = worst_member_scores(r);
    scores.sum() / scores.len() as f64
}
