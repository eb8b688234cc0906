use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::Result;

/// Element-wise activation applied after a dense layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Activation {
    Elu,
    Relu,
    LeakyRelu(f64),
}

impl Activation {
    pub fn apply(&self, z: &Tensor) -> Result<Tensor> {
        let out = match *self {
            Activation::Elu => z.elu(1.0)?,
            Activation::Relu => z.relu()?,
            // relu(z) - alpha * relu(-z)
            Activation::LeakyRelu(alpha) => (z.relu()? - z.neg()?.relu()?.affine(alpha, 0.0)?)?,
        };
        Ok(out)
    }
}

/// Fully connected layer whose weight and bias are trainable [`Var`]s.
#[derive(Debug)]
pub struct Dense {
    linear: Linear,
    weight: Var,
    bias: Var,
    activation: Activation,
    activity_l2: f64,
}

impl Dense {
    /// Glorot-uniform weights drawn from `rng` and zero bias.
    pub fn new(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let values: Vec<f64> = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        let weight = Var::from_tensor(&Tensor::from_vec(values, (outputs, inputs), device)?)?;
        let bias = Var::zeros(outputs, DType::F64, device)?;
        let linear = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));
        Ok(Dense {
            linear,
            weight,
            bias,
            activation,
            activity_l2: 0.0,
        })
    }

    /// Penalise `l2 * sum(output^2) / batch` on this layer's activations.
    pub fn with_activity_l2(mut self, l2: f64) -> Self {
        self.activity_l2 = l2;
        self
    }

    pub fn vars(&self) -> [Var; 2] {
        [self.weight.clone(), self.bias.clone()]
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.activation.apply(&self.linear.forward(x)?)
    }

    /// Activity penalty contributed by an output batch, if the layer has one.
    pub fn activity_penalty(&self, output: &Tensor) -> Result<Option<Tensor>> {
        if self.activity_l2 == 0.0 {
            return Ok(None);
        }
        let batch = output.dim(0)?.max(1) as f64;
        Ok(Some(output.sqr()?.sum_all()?.affine(self.activity_l2 / batch, 0.0)?))
    }
}

/// Inverted dropout mask: kept units are scaled by `1 / (1 - rate)`.
///
/// Returns `None` when nothing would be dropped.
pub fn dropout_mask(
    shape: (usize, usize),
    rate: f64,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Option<Tensor>> {
    if rate <= 0.0 {
        return Ok(None);
    }
    let keep = 1.0 - rate;
    let values: Vec<f64> = (0..shape.0 * shape.1)
        .map(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
        .collect();
    Ok(Some(Tensor::from_vec(values, shape, device)?))
}
