use serde::Serialize;
use tracing::{debug, info};

use crate::config::SweepConfig;
use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::losses::LossPair;
use crate::models::base_model::EnsembleTrainer;
use crate::utils::evaluation::{check_both_classes, roc_auc, score_model, ScoreFrame, ThresholdMetrics};
use crate::utils::stats::RunStatistic;

/// Aggregated result of one (width, loss pair) configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub width: usize,
    pub pair: LossPair,
    /// ROC-AUC of every run, in run order.
    pub rocs: Vec<f64>,
    /// Mean of `rocs`; the value written to the results matrix.
    pub mean_roc: f64,
    pub roc_std: f64,
    pub mean_scores: Vec<f64>,
    /// ROC-AUC of `mean_scores`. Informational only.
    pub roc_of_mean_scores: Option<f64>,
    /// Threshold metrics of `mean_scores`.
    pub mean_score_metrics: ThresholdMetrics,
}

/// Trains and scores one configuration `num_runs` times with independent seeds.
pub struct RunAggregator<'a, T: EnsembleTrainer> {
    trainer: &'a T,
    num_runs: usize,
    threshold: f64,
    seed: u64,
}

impl<'a, T: EnsembleTrainer> RunAggregator<'a, T> {
    pub fn new(trainer: &'a T, num_runs: usize, threshold: f64, seed: u64) -> Self {
        RunAggregator {
            trainer,
            num_runs,
            threshold,
            seed,
        }
    }

    pub fn from_config(trainer: &'a T, config: &SweepConfig) -> Self {
        Self::new(trainer, config.num_runs, config.threshold, config.seed)
    }

    /// Run every repetition of `pair` at `width` and aggregate the ROCs.
    ///
    /// `pair_index` only feeds the seed derivation. The first failing run
    /// ends the evaluation.
    pub fn evaluate(
        &self,
        width: usize,
        pair_index: usize,
        pair: LossPair,
        data: &Dataset,
    ) -> Result<ConfigSummary> {
        if self.num_runs == 0 {
            return Err(Error::config("num_runs must be at least 1"));
        }
        pair.train.validate_width(width)?;
        pair.predict.validate_width(width)?;
        check_both_classes(data.test_labels.view())?;

        let mut stats = RunStatistic::new();
        for run in 0..self.num_runs {
            let seed = derive_seed(self.seed, width, pair_index, run);
            let model = self.trainer.train(width, pair.train, data.train.view(), seed)?;
            let eval = score_model(
                &model,
                data.test.view(),
                data.test_labels.view(),
                pair.predict,
                self.threshold,
            )?;
            debug!(width, pair = %pair, run, seed, roc = eval.roc_auc, "run finished");
            stats.update(eval.roc_auc, &eval.scores)?;
        }

        let mean_scores = stats.mean_scores().unwrap_or_default();
        let roc_of_mean_scores = roc_auc(data.test_labels.view(), mean_scores.view()).ok();
        let mean_score_metrics =
            ScoreFrame::new(mean_scores.view(), data.test_labels.view(), self.threshold).threshold_metrics();

        info!(
            width,
            pair = %pair,
            mean_roc = stats.mean_roc(),
            roc_std = stats.roc_std(),
            roc_of_mean_scores = ?roc_of_mean_scores,
            "configuration done"
        );

        Ok(ConfigSummary {
            width,
            pair,
            rocs: stats.rocs().to_vec(),
            mean_roc: stats.mean_roc(),
            roc_std: stats.roc_std(),
            mean_scores: mean_scores.to_vec(),
            roc_of_mean_scores,
            mean_score_metrics,
        })
    }
}

/// Seed of one run, mixed from the sweep seed and the run's coordinates.
pub fn derive_seed(base: u64, width: usize, pair_index: usize, run: usize) -> u64 {
    [width, pair_index, run]
        .iter()
        .fold(splitmix64(base), |acc, &part| splitmix64(acc ^ part as u64))
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
