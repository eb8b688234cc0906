//! Training-mode losses as candle graphs.
//!
//! Each graph computes the same scalar as [`LossKind::training_loss`] from
//! tensors that may carry autograd history, so backpropagation reaches the
//! member weights that produced `outputs`.

use candle_core::Tensor;
use ndarray::Array2;

use super::max_mse::worst;
use super::pairwise::pair_count;
use super::LossKind;
use crate::error::{Error, Result};

impl LossKind {
    /// Differentiable training loss.
    ///
    /// `reference` is `(batch, feature)` and `outputs` is
    /// `(batch, feature, member)`. Returns a rank-0 tensor.
    pub fn training_graph(&self, reference: &Tensor, outputs: &Tensor) -> Result<Tensor> {
        let (batch, features, members) = outputs.dims3()?;
        self.check_dims(reference.dims2()?, (batch, features, members))?;

        // (member, batch, feature)
        let r = outputs.permute((2, 0, 1))?.broadcast_sub(reference)?;
        let value = match self {
            LossKind::MemberMse => r.sqr()?.mean_all()?,
            LossKind::ConsensusMse | LossKind::MeanBias => {
                (outputs.mean(2)? - reference)?.sqr()?.mean_all()?
            }
            LossKind::MaxMse => {
                let errors = r.sqr()?.mean(2)?;
                let mask = worst_member_mask(&errors)?;
                (errors * mask)?.sum(0)?.mean_all()?
            }
            LossKind::PairwiseResidual => {
                let flat = r.reshape((members, batch * features))?;
                let gram = (flat.matmul(&flat.t()?)? / (batch * features) as f64)?;
                (upper_abs_sum(&gram)? / pair_count(members))?
            }
            LossKind::PairwiseReduced => {
                let errors = r.sqr()?.mean(2)?;
                let gram = (errors.matmul(&errors.t()?)? / batch as f64)?;
                upper_abs_sum(&gram)?
            }
        };
        Ok(value)
    }
}

/// One-hot `(member, batch)` mask selecting the worst member per example.
fn worst_member_mask(errors: &Tensor) -> Result<Tensor> {
    let (members, batch) = errors.dims2()?;
    let values = errors.flatten_all()?.to_vec1::<f64>()?;
    let values = Array2::from_shape_vec((members, batch), values)
        .map_err(|e| Error::invalid_data(e.to_string()))?;
    let mut mask = vec![0.0; members * batch];
    for (b, (m, _)) in worst(&values).into_iter().enumerate() {
        mask[m * batch + b] = 1.0;
    }
    Ok(Tensor::from_vec(mask, (members, batch), errors.device())?)
}

/// Sum of `|gram[i, j]|` over `i < j`.
fn upper_abs_sum(gram: &Tensor) -> Result<Tensor> {
    let n = gram.dim(0)?;
    let upper: Vec<f64> = (0..n * n)
        .map(|k| if k / n < k % n { 1.0 } else { 0.0 })
        .collect();
    let upper = Tensor::from_vec(upper, (n, n), gram.device())?;
    Ok((gram.abs()? * upper)?.sum_all()?)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{dense, two_member};
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{Device, Var};
    use ndarray::{Array2, Array3};

    fn tensor2(a: &Array2<f64>) -> Tensor {
        Tensor::from_vec(a.iter().copied().collect(), a.dim(), &Device::Cpu).unwrap()
    }

    fn tensor3(a: &Array3<f64>) -> Tensor {
        Tensor::from_vec(a.iter().copied().collect(), a.dim(), &Device::Cpu).unwrap()
    }

    #[test]
    fn graph_matches_ndarray_training_loss() {
        let (a, y) = dense(4, 3, 3);
        for kind in LossKind::ALL {
            let expected = kind.training_loss(a.view(), y.view()).unwrap();
            let got = kind
                .training_graph(&tensor2(&a), &tensor3(&y))
                .unwrap()
                .to_scalar::<f64>()
                .unwrap();
            assert_abs_diff_eq!(got, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn max_mse_gradient_reaches_only_the_worst_member() {
        // member 0 residuals [1, 2] (mse 2.5), member 1 [3, -1] (mse 5)
        let (a, y) = two_member();
        let outputs = Var::from_tensor(&tensor3(&y)).unwrap();
        let loss = LossKind::MaxMse
            .training_graph(&tensor2(&a), outputs.as_tensor())
            .unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads.get(&outputs).unwrap().flatten_all().unwrap();
        // layout (batch, feature, member): 2 * r / (batch * features) on member 1
        assert_eq!(grad.to_vec1::<f64>().unwrap(), vec![0.0, 3.0, 0.0, -1.0]);
    }

    #[test]
    fn consensus_gradient_is_shared_equally() {
        let (a, y) = two_member();
        let outputs = Var::from_tensor(&tensor3(&y)).unwrap();
        let loss = LossKind::ConsensusMse
            .training_graph(&tensor2(&a), outputs.as_tensor())
            .unwrap();
        let grad = loss.backward().unwrap().get(&outputs).unwrap().to_vec3::<f64>().unwrap();
        for feature in &grad[0] {
            assert_abs_diff_eq!(feature[0], feature[1], epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_residual_has_zero_pairwise_gradient() {
        let a = Array2::from_shape_fn((2, 2), |(b, f)| (b + f) as f64);
        let y = Array3::from_shape_fn((2, 2, 3), |(b, f, _)| a[[b, f]]);
        for kind in [LossKind::PairwiseResidual, LossKind::PairwiseReduced] {
            let outputs = Var::from_tensor(&tensor3(&y)).unwrap();
            let loss = kind.training_graph(&tensor2(&a), outputs.as_tensor()).unwrap();
            assert_eq!(loss.to_scalar::<f64>().unwrap(), 0.0);
            let grad = loss.backward().unwrap().get(&outputs).unwrap().flatten_all().unwrap();
            assert!(grad.to_vec1::<f64>().unwrap().iter().all(|&g| g == 0.0));
        }
    }

    #[test]
    fn graph_rejects_bad_shapes() {
        let (a, y) = two_member();
        let single = Tensor::zeros((1, 2, 1), candle_core::DType::F64, &Device::Cpu).unwrap();
        let err = LossKind::PairwiseReduced
            .training_graph(&tensor2(&a), &single)
            .unwrap_err();
        assert!(err.is_config());
        let wide = Tensor::zeros((1, 3), candle_core::DType::F64, &Device::Cpu).unwrap();
        let err = LossKind::MemberMse.training_graph(&wide, &tensor3(&y)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
