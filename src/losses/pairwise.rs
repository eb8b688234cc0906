//! Pairwise disagreement between ensemble members.
//!
//! Both variants need at least two members; the caller validates the width.

use ndarray::{Array1, Array2, Array3, Axis, Zip};

/// Unordered member pairs `(i, j)` with `i < j`.
fn pairs(members: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..members).flat_map(move |i| (i + 1..members).map(move |j| (i, j)))
}

pub(super) fn pair_count(members: usize) -> f64 {
    (members * (members - 1) / 2) as f64
}

/// Mean over examples and features of `r_i * r_j`.
fn co_movement(r: &Array3<f64>, i: usize, j: usize) -> f64 {
    let ri = r.index_axis(Axis(0), i);
    let rj = r.index_axis(Axis(0), j);
    let mut acc = 0.0;
    Zip::from(&ri).and(&rj).for_each(|&a, &b| acc += a * b);
    acc / ri.len() as f64
}

/// Sum over pairs of `|mean(r_i * r_j)|`, normalised by the number of pairs.
pub(super) fn residual(r: &Array3<f64>) -> f64 {
    let members = r.len_of(Axis(0));
    let total: f64 = pairs(members).map(|(i, j)| co_movement(r, i, j).abs()).sum();
    total / pair_count(members)
}

/// Per example: the same quantity with the mean taken over features only.
pub(super) fn residual_scores(r: &Array3<f64>) -> Array1<f64> {
    let (members, batch, features) = r.dim();
    let mut scores = Array1::zeros(batch);
    for (i, j) in pairs(members) {
        let product = &r.index_axis(Axis(0), i) * &r.index_axis(Axis(0), j);
        let per_example = product.sum_axis(Axis(1)) / features as f64;
        scores += &per_example.mapv(f64::abs);
    }
    scores / pair_count(members)
}

/// Per-member error reduced over features, shape `(member, batch)`.
fn member_errors(r: &Array3<f64>) -> Array2<f64> {
    let features = r.len_of(Axis(2)) as f64;
    r.mapv(|v| v * v).sum_axis(Axis(2)) / features
}

fn error_co_movement(e: &Array2<f64>, i: usize, j: usize) -> f64 {
    let ei = e.row(i);
    let ej = e.row(j);
    ei.dot(&ej) / ei.len() as f64
}

/// Sum over pairs of `|mean_b(e_i * e_j)|` where `e` is the per-example member MSE.
pub(super) fn reduced(r: &Array3<f64>) -> f64 {
    let e = member_errors(r);
    pairs(e.nrows())
        .map(|(i, j)| error_co_movement(&e, i, j).abs())
        .sum()
}

/// Per example: sum over pairs of `|e_i * e_j|`.
pub(super) fn reduced_scores(r: &Array3<f64>) -> Array1<f64> {
    let e = member_errors(r);
    let mut scores = Array1::zeros(e.ncols());
    for (i, j) in pairs(e.nrows()) {
        scores += &(&e.row(i) * &e.row(j)).mapv(f64::abs);
    }
    scores
}
