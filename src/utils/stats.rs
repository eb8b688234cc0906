use ndarray::Array1;

use crate::error::{Error, Result};

/// Running statistics over the runs of one configuration.
///
/// Tracks mean and variance of the per-run ROC-AUC incrementally and keeps
/// an element-wise sum of the per-run score vectors.
#[derive(Clone, Debug, Default)]
pub struct RunStatistic {
    num_items: usize,
    rocs: Vec<f64>,
    mean: f64,
    sum_squares: f64,
    score_sum: Option<Array1<f64>>,
}

impl RunStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one run's ROC-AUC and score vector.
    ///
    /// Every score vector must have the length of the first one.
    pub fn update(&mut self, roc: f64, scores: &Array1<f64>) -> Result<()> {
        match &mut self.score_sum {
            Some(sum) => {
                if sum.len() != scores.len() {
                    return Err(Error::shape_mismatch(
                        format!("{} scores per run", sum.len()),
                        format!("{} scores", scores.len()),
                    ));
                }
                *sum += scores;
            }
            None => self.score_sum = Some(scores.clone()),
        }

        self.num_items += 1;
        self.rocs.push(roc);
        let old_mean = self.mean;
        self.mean += (roc - old_mean) / self.num_items as f64;
        self.sum_squares += (roc - old_mean) * (roc - self.mean);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.num_items
    }

    pub fn rocs(&self) -> &[f64] {
        &self.rocs
    }

    /// Mean of the per-run ROC-AUC values; NaN before any update.
    pub fn mean_roc(&self) -> f64 {
        if self.num_items == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Population standard deviation of the per-run ROC-AUC values.
    pub fn roc_std(&self) -> f64 {
        if self.num_items == 0 {
            f64::NAN
        } else {
            (self.sum_squares / self.num_items as f64).sqrt()
        }
    }

    /// Element-wise mean of the score vectors seen so far.
    pub fn mean_scores(&self) -> Option<Array1<f64>> {
        self.score_sum
            .as_ref()
            .map(|sum| sum / self.num_items as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn empty_statistic_is_nan() {
        let stat = RunStatistic::new();
        assert!(stat.mean_roc().is_nan());
        assert!(stat.roc_std().is_nan());
        assert!(stat.mean_scores().is_none());
    }

    #[test]
    fn mean_and_std_of_rocs() {
        let mut stat = RunStatistic::new();
        for (roc, scores) in [(0.6, array![1.0, 3.0]), (0.8, array![3.0, 5.0]), (1.0, array![2.0, 1.0])] {
            stat.update(roc, &scores).unwrap();
        }
        assert_eq!(stat.count(), 3);
        assert_abs_diff_eq!(stat.mean_roc(), 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(stat.roc_std(), (0.08f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(stat.mean_scores().unwrap(), array![2.0, 3.0]);
        assert_eq!(stat.rocs(), &[0.6, 0.8, 1.0]);
    }

    #[test]
    fn score_length_must_not_change() {
        let mut stat = RunStatistic::new();
        stat.update(0.5, &array![1.0, 2.0]).unwrap();
        assert!(stat.update(0.5, &array![1.0]).is_err());
        assert_eq!(stat.count(), 1);
    }
}
