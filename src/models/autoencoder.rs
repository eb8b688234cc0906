use candle_core::{Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer};
use ndarray::{Array3, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::losses::LossKind;
use crate::models::base_model::EnsembleModel;
use crate::models::layers::{dropout_mask, Activation, Dense};

#[derive(Debug)]
enum Layer {
    Dense(Dense),
    Dropout(f64),
}

/// One encoder/decoder branch of the ensemble.
#[derive(Debug)]
struct Member {
    layers: Vec<Layer>,
    /// Draws this member's dropout masks.
    rng: StdRng,
}

impl Member {
    fn new(input_dim: usize, cfg: &NetworkConfig, seed: u64, device: &Device) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let enc = cfg.encoding_dim;
        let h1 = cfg.hidden_dim_1;
        let h2 = cfg.hidden_dim_2;
        let mut dense = |inputs: usize, outputs: usize, activation: Activation| {
            Dense::new(inputs, outputs, activation, &mut rng, device)
        };

        let layers = vec![
            // Encoder
            Layer::Dense(dense(input_dim, enc, Activation::Elu)?.with_activity_l2(cfg.activity_l2)),
            Layer::Dropout(cfg.dropout),
            Layer::Dense(dense(enc, h1, Activation::Relu)?),
            Layer::Dense(dense(h1, h2, Activation::LeakyRelu(cfg.leaky_relu_alpha))?),
            // Decoder
            Layer::Dense(dense(h2, h1, Activation::Relu)?),
            Layer::Dropout(cfg.dropout),
            Layer::Dense(dense(h1, enc, Activation::Relu)?),
            Layer::Dense(dense(enc, input_dim, Activation::Elu)?),
        ];

        Ok(Member { layers, rng })
    }

    fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.layers.iter().flat_map(|layer| match layer {
            Layer::Dense(dense) => dense.vars().to_vec(),
            Layer::Dropout(_) => Vec::new(),
        })
    }

    /// Inference pass: dropout disabled.
    fn forward(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        run_layers(&self.layers, x, None)
    }

    fn forward_train(&mut self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        run_layers(&self.layers, x, Some(&mut self.rng))
    }
}

/// Output of `layers` on `x` and the summed activity penalty.
///
/// Dropout masks are drawn from `rng`; without one, dropout layers pass through.
fn run_layers(layers: &[Layer], x: &Tensor, mut rng: Option<&mut StdRng>) -> Result<(Tensor, Option<Tensor>)> {
    let mut h = x.clone();
    let mut penalty = None;
    for layer in layers {
        match layer {
            Layer::Dense(dense) => {
                h = dense.forward(&h)?;
                if let Some(p) = dense.activity_penalty(&h)? {
                    penalty = Some(add_penalty(penalty, p)?);
                }
            }
            Layer::Dropout(rate) => {
                if let Some(rng) = rng.as_deref_mut() {
                    if let Some(mask) = dropout_mask(h.dims2()?, *rate, rng, h.device())? {
                        h = (h * mask)?;
                    }
                }
            }
        }
    }
    Ok((h, penalty))
}

fn add_penalty(total: Option<Tensor>, p: Tensor) -> Result<Tensor> {
    match total {
        Some(total) => Ok((total + p)?),
        None => Ok(p),
    }
}

/// Ensemble of independent autoencoders sharing one input.
///
/// Outputs are stacked on a trailing member axis: `(batch, feature, member)`.
#[derive(Debug)]
pub struct ParallelAutoencoder {
    members: Vec<Member>,
    input_dim: usize,
    device: Device,
}

impl ParallelAutoencoder {
    /// Member `i` is seeded with `seed + 1 + i`.
    pub fn new(input_dim: usize, width: usize, cfg: &NetworkConfig, seed: u64) -> Result<Self> {
        let device = Device::Cpu;
        let members = (0..width)
            .map(|i| Member::new(input_dim, cfg, seed.wrapping_add(1 + i as u64), &device))
            .collect::<Result<Vec<_>>>()?;
        Ok(ParallelAutoencoder {
            members,
            input_dim,
            device,
        })
    }

    /// Every trainable variable, member by member in layer order.
    pub fn vars(&self) -> Vec<Var> {
        self.members.iter().flat_map(Member::vars).collect()
    }

    fn to_tensor(&self, x: ArrayView2<f64>) -> Result<Tensor> {
        if x.ncols() != self.input_dim {
            return Err(Error::shape_mismatch(
                format!("{} input features", self.input_dim),
                format!("{} input features", x.ncols()),
            ));
        }
        Ok(Tensor::from_vec(x.iter().copied().collect(), x.dim(), &self.device)?)
    }

    fn stack(passes: Vec<(Tensor, Option<Tensor>)>) -> Result<(Tensor, Option<Tensor>)> {
        let mut outputs = Vec::with_capacity(passes.len());
        let mut penalty = None;
        for (output, p) in passes {
            outputs.push(output);
            if let Some(p) = p {
                penalty = Some(add_penalty(penalty, p)?);
            }
        }
        Ok((Tensor::stack(&outputs, 2)?, penalty))
    }

    /// Inference reconstruction `(batch, feature, member)` with the summed activity penalty.
    fn forward(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        let passes = self
            .members
            .par_iter()
            .map(|m| m.forward(x))
            .collect::<Result<Vec<_>>>()?;
        Self::stack(passes)
    }

    fn forward_train(&mut self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        let passes = self
            .members
            .par_iter_mut()
            .map(|m| m.forward_train(x))
            .collect::<Result<Vec<_>>>()?;
        Self::stack(passes)
    }

    /// Objective on held-out rows: training-mode loss plus activity penalty.
    pub(crate) fn objective(&self, x: ArrayView2<f64>, loss: LossKind) -> Result<f64> {
        let x = self.to_tensor(x)?;
        let (outputs, penalty) = self.forward(&x)?;
        let value = loss.training_graph(&x, &outputs)?.to_scalar::<f64>()?;
        let penalty = match penalty {
            Some(p) => p.to_scalar::<f64>()?,
            None => 0.0,
        };
        Ok(value + penalty)
    }

    /// One optimisation step on a mini-batch; returns the batch objective.
    ///
    /// A non-finite objective leaves the weights untouched.
    pub(crate) fn train_step(&mut self, xb: ArrayView2<f64>, loss: LossKind, opt: &mut AdamW) -> Result<f64> {
        let x = self.to_tensor(xb)?;
        let (outputs, penalty) = self.forward_train(&x)?;
        let mut objective = loss.training_graph(&x, &outputs)?;
        if let Some(p) = penalty {
            objective = (objective + p)?;
        }
        let value = objective.to_scalar::<f64>()?;
        if value.is_finite() {
            opt.backward_step(&objective)?;
        }
        Ok(value)
    }

    /// Copy of every variable, in [`ParallelAutoencoder::vars`] order.
    pub(crate) fn snapshot(&self) -> Result<Vec<Tensor>> {
        self.vars()
            .iter()
            .map(|var| Ok(var.as_tensor().copy()?))
            .collect()
    }

    pub(crate) fn restore(&self, snapshot: &[Tensor]) -> Result<()> {
        for (var, saved) in self.vars().iter().zip(snapshot) {
            var.set(saved)?;
        }
        Ok(())
    }
}

impl EnsembleModel for ParallelAutoencoder {
    fn width(&self) -> usize {
        self.members.len()
    }

    fn reconstruct(&self, x: ArrayView2<f64>) -> Result<Array3<f64>> {
        let (outputs, _) = self.forward(&self.to_tensor(x)?)?;
        let dims = outputs.dims3()?;
        let values = outputs.flatten_all()?.to_vec1::<f64>()?;
        Array3::from_shape_vec(dims, values).map_err(|e| Error::invalid_data(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::ParamsAdamW;
    use ndarray::{Array2, Axis};

    fn inputs() -> Array2<f64> {
        Array2::from_shape_fn((12, 5), |(b, f)| ((b * 5 + f) as f64 * 0.13).sin().abs())
    }

    fn model(input_dim: usize, width: usize, cfg: &NetworkConfig, seed: u64) -> ParallelAutoencoder {
        ParallelAutoencoder::new(input_dim, width, cfg, seed).unwrap()
    }

    #[test]
    fn reconstruction_has_member_axis_last() {
        let model = model(5, 4, &NetworkConfig::default(), 1);
        let out = model.reconstruct(inputs().view()).unwrap();
        assert_eq!(out.dim(), (12, 5, 4));
        assert_eq!(model.width(), 4);
    }

    #[test]
    fn members_are_initialised_independently() {
        let model = model(5, 2, &NetworkConfig::default(), 1);
        let out = model.reconstruct(inputs().view()).unwrap();
        assert_ne!(out.index_axis(Axis(2), 0), out.index_axis(Axis(2), 1));
    }

    #[test]
    fn same_seed_same_model() {
        let a = model(5, 3, &NetworkConfig::default(), 42);
        let b = model(5, 3, &NetworkConfig::default(), 42);
        let x = inputs();
        assert_eq!(a.reconstruct(x.view()).unwrap(), b.reconstruct(x.view()).unwrap());
    }

    #[test]
    fn wrong_feature_count_is_rejected() {
        let model = model(4, 2, &NetworkConfig::default(), 1);
        let err = model.reconstruct(inputs().view()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn every_member_contributes_its_variables() {
        let model = model(5, 3, &NetworkConfig::default(), 1);
        // six dense layers with a weight and a bias each
        assert_eq!(model.vars().len(), 3 * 6 * 2);
    }

    #[test]
    fn train_steps_lower_the_objective() {
        let cfg = NetworkConfig {
            dropout: 0.0,
            ..NetworkConfig::default()
        };
        let mut model = model(5, 3, &cfg, 9);
        let x = inputs();
        let mut opt = AdamW::new(
            model.vars(),
            ParamsAdamW {
                lr: 1e-2,
                weight_decay: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        let before = model.objective(x.view(), LossKind::MemberMse).unwrap();
        for _ in 0..200 {
            model.train_step(x.view(), LossKind::MemberMse, &mut opt).unwrap();
        }
        let after = model.objective(x.view(), LossKind::MemberMse).unwrap();
        assert!(after < before, "{after} >= {before}");
    }

    #[test]
    fn restore_brings_back_snapshot_weights() {
        let mut model = model(5, 2, &NetworkConfig::default(), 4);
        let x = inputs();
        let saved = model.snapshot().unwrap();
        let before = model.reconstruct(x.view()).unwrap();

        let mut opt = AdamW::new(model.vars(), ParamsAdamW::default()).unwrap();
        for _ in 0..5 {
            model.train_step(x.view(), LossKind::ConsensusMse, &mut opt).unwrap();
        }
        assert_ne!(model.reconstruct(x.view()).unwrap(), before);

        model.restore(&saved).unwrap();
        assert_eq!(model.reconstruct(x.view()).unwrap(), before);
    }
}
