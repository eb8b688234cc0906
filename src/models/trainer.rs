use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::debug;

use crate::config::{NetworkConfig, TrainConfig};
use crate::error::{Error, Result};
use crate::losses::LossKind;
use crate::models::autoencoder::ParallelAutoencoder;
use crate::models::base_model::EnsembleTrainer;

/// Loss values recorded after one epoch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainHistory {
    pub epochs: Vec<EpochRecord>,
    /// Epoch whose weights the model ended with.
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

/// A trained ensemble together with the history of its fit.
#[derive(Debug)]
pub struct TrainedAutoencoder {
    pub model: ParallelAutoencoder,
    pub history: TrainHistory,
}

/// Fits [`ParallelAutoencoder`]s with Adam and early stopping on a held-out tail.
#[derive(Clone, Debug, Default)]
pub struct AutoencoderTrainer {
    pub network: NetworkConfig,
    pub training: TrainConfig,
}

impl AutoencoderTrainer {
    pub fn new(network: NetworkConfig, training: TrainConfig) -> Self {
        AutoencoderTrainer { network, training }
    }

    /// Train a fresh model and keep its history.
    pub fn train_with_history(
        &self,
        width: usize,
        loss: LossKind,
        x: ArrayView2<f64>,
        seed: u64,
    ) -> Result<TrainedAutoencoder> {
        loss.validate_width(width)?;
        let mut model = ParallelAutoencoder::new(x.ncols(), width, &self.network, seed)?;
        let history = self.fit(&mut model, loss, x, seed)?;
        Ok(TrainedAutoencoder { model, history })
    }

    /// Fit `model` in place and return the per-epoch history.
    ///
    /// The last `validation_split` fraction of `x` is held out before any
    /// shuffling. Training stops once the monitored loss has not improved by
    /// more than `min_delta` for `patience` epochs, and the best weights seen
    /// are restored. Without a validation slice the training loss is monitored.
    pub fn fit(
        &self,
        model: &mut ParallelAutoencoder,
        loss: LossKind,
        x: ArrayView2<f64>,
        seed: u64,
    ) -> Result<TrainHistory> {
        let cfg = &self.training;
        let n = x.nrows();
        if n == 0 {
            return Err(Error::invalid_data("no training rows"));
        }
        let split_at = ((n as f64 * (1.0 - cfg.validation_split)) as usize).clamp(1, n);
        let (train, val) = x.split_at(Axis(0), split_at);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut opt = AdamW::new(model.vars(), adam(cfg.learning_rate))?;
        let mut order: Vec<usize> = (0..train.nrows()).collect();
        let mut history = TrainHistory::default();
        let mut best: Option<(f64, Vec<Tensor>)> = None;
        let mut wait = 0;

        for epoch in 0..cfg.epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            for chunk in order.chunks(cfg.batch_size) {
                let xb = train.select(Axis(0), chunk);
                let batch_loss = model.train_step(xb.view(), loss, &mut opt)?;
                if !batch_loss.is_finite() {
                    return Err(Error::Diverged {
                        epoch,
                        value: batch_loss,
                    });
                }
                total += batch_loss * chunk.len() as f64;
            }
            let train_loss = total / train.nrows() as f64;

            let val_loss = if val.nrows() > 0 {
                let v = model.objective(val, loss)?;
                if !v.is_finite() {
                    return Err(Error::Diverged { epoch, value: v });
                }
                Some(v)
            } else {
                None
            };
            history.epochs.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
            });

            let monitored = val_loss.unwrap_or(train_loss);
            let improved = match &best {
                None => true,
                Some((best_loss, _)) => monitored < best_loss - cfg.min_delta,
            };
            if improved {
                best = Some((monitored, model.snapshot()?));
                history.best_epoch = Some(epoch);
                wait = 0;
            } else {
                wait += 1;
                if wait >= cfg.patience {
                    debug!(
                        epoch,
                        best_epoch = ?history.best_epoch,
                        "early stopping: no improvement for {} epochs",
                        cfg.patience
                    );
                    history.stopped_early = true;
                    break;
                }
            }
        }

        if let Some((_, weights)) = best {
            model.restore(&weights)?;
        }
        Ok(history)
    }
}

/// Adam without weight decay.
fn adam(lr: f64) -> ParamsAdamW {
    ParamsAdamW {
        lr,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-7,
        weight_decay: 0.0,
    }
}

impl EnsembleTrainer for AutoencoderTrainer {
    type Model = ParallelAutoencoder;

    fn train(&self, width: usize, loss: LossKind, x: ArrayView2<f64>, seed: u64) -> Result<ParallelAutoencoder> {
        self.train_with_history(width, loss, x, seed)
            .map(|trained| trained.model)
    }
}
