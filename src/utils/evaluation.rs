use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::losses::LossKind;
use crate::models::base_model::EnsembleModel;

/// One test example: its anomaly score, true class and thresholded prediction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoreRow {
    pub score: f64,
    pub true_class: u8,
    pub predicted: u8,
}

/// Counts of a binary confusion matrix; class 1 is the anomaly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Confusion {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ThresholdMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-example table of scores, labels and fixed-threshold predictions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreFrame {
    pub threshold: f64,
    pub rows: Vec<ScoreRow>,
}

impl ScoreFrame {
    /// An example is predicted anomalous when its score is strictly above `threshold`.
    pub fn new(scores: ArrayView1<f64>, labels: ArrayView1<u8>, threshold: f64) -> Self {
        let rows = scores
            .iter()
            .zip(labels.iter())
            .map(|(&score, &true_class)| ScoreRow {
                score,
                true_class,
                predicted: u8::from(score > threshold),
            })
            .collect();
        ScoreFrame { threshold, rows }
    }

    pub fn predicted(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.predicted).collect()
    }

    pub fn confusion(&self) -> Confusion {
        let mut c = Confusion::default();
        for row in &self.rows {
            match (row.true_class > 0, row.predicted > 0) {
                (false, false) => c.true_negatives += 1,
                (false, true) => c.false_positives += 1,
                (true, false) => c.false_negatives += 1,
                (true, true) => c.true_positives += 1,
            }
        }
        c
    }

    /// Precision, recall and F1 at the frame's threshold; undefined ratios are 0.
    pub fn threshold_metrics(&self) -> ThresholdMetrics {
        let c = self.confusion();
        let tp = c.true_positives as f64;
        let fp = c.false_positives as f64;
        let fn_count = c.false_negatives as f64;

        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if tp + fn_count > 0.0 { tp / (tp + fn_count) } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ThresholdMetrics { precision, recall, f1 }
    }
}

/// Result of scoring one trained model on the test set.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub roc_auc: f64,
    pub scores: Array1<f64>,
    pub frame: ScoreFrame,
}

/// Fail with [`Error::DegenerateLabels`] unless both classes are present.
pub fn check_both_classes(labels: ArrayView1<u8>) -> Result<()> {
    let positives = labels.iter().filter(|&&l| l > 0).count();
    if positives == 0 {
        return Err(Error::DegenerateLabels { class: 0 });
    }
    if positives == labels.len() {
        return Err(Error::DegenerateLabels { class: 1 });
    }
    Ok(())
}

/// Area under the ROC curve of `scores` against binary `labels`.
///
/// Computed from the rank-sum statistic with average ranks for tied scores,
/// which equals the trapezoidal area under the empirical ROC curve.
pub fn roc_auc(labels: ArrayView1<u8>, scores: ArrayView1<f64>) -> Result<f64> {
    if labels.len() != scores.len() {
        return Err(Error::shape_mismatch(
            format!("{} scores", labels.len()),
            format!("{} scores", scores.len()),
        ));
    }
    check_both_classes(labels)?;
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(Error::invalid_data(format!(
            "score {} of example {} is not finite",
            scores[i], i
        )));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Sum of 1-based ranks of the positives, ties sharing their mean rank.
    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let mean_rank = (start + end + 1) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| labels[i] > 0).count();
        positive_rank_sum += mean_rank * tied_positives as f64;
        start = end;
    }

    let n_pos = labels.iter().filter(|&&l| l > 0).count() as f64;
    let n_neg = labels.len() as f64 - n_pos;
    Ok((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Score `model` on the test set with a prediction-mode loss.
///
/// Labels are checked before inference; a single-class test set is an error.
pub fn score_model<M: EnsembleModel>(
    model: &M,
    test_x: ArrayView2<f64>,
    test_y: ArrayView1<u8>,
    predict_loss: LossKind,
    threshold: f64,
) -> Result<Evaluation> {
    if test_x.nrows() != test_y.len() {
        return Err(Error::shape_mismatch(
            format!("{} test labels", test_x.nrows()),
            format!("{} test labels", test_y.len()),
        ));
    }
    check_both_classes(test_y)?;

    let outputs = model.reconstruct(test_x)?;
    let scores = predict_loss.prediction_scores(test_x, outputs.view())?;
    let roc_auc = roc_auc(test_y, scores.view())?;
    let frame = ScoreFrame::new(scores.view(), test_y, threshold);
    Ok(Evaluation {
        roc_auc,
        scores,
        frame,
    })
}
