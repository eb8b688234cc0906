use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_abs_diff_eq;
use ensemble_ae::{
    Dataset, EnsembleModel, EnsembleTrainer, Error, FailurePolicy, LossKind, LossPair, OutputPaths, Result, Sweep,
    SweepConfig, SyntheticSpec, TrainConfig, WidthRange,
};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use tempfile::tempdir;

fn small_config(widths: WidthRange, losses: Vec<LossPair>) -> SweepConfig {
    SweepConfig {
        num_runs: 2,
        widths,
        losses,
        threads: Some(2),
        training: TrainConfig {
            epochs: 20,
            batch_size: 32,
            learning_rate: 1e-2,
            ..TrainConfig::default()
        },
        ..SweepConfig::default()
    }
}

/// Every member returns the input shrunk by one half.
struct Halving {
    width: usize,
}

impl EnsembleModel for Halving {
    fn width(&self) -> usize {
        self.width
    }

    fn reconstruct(&self, x: ArrayView2<f64>) -> Result<Array3<f64>> {
        let out = x.mapv(|v| v * 0.5);
        Ok(ndarray::stack(Axis(2), &vec![out.view(); self.width]).unwrap())
    }
}

/// Counts training calls and fails for one training loss.
struct ScriptedTrainer {
    calls: AtomicUsize,
    failing: Option<LossKind>,
}

impl ScriptedTrainer {
    fn new(failing: Option<LossKind>) -> Self {
        ScriptedTrainer {
            calls: AtomicUsize::new(0),
            failing,
        }
    }
}

impl EnsembleTrainer for ScriptedTrainer {
    type Model = Halving;

    fn train(&self, width: usize, loss: LossKind, _x: ArrayView2<f64>, _seed: u64) -> Result<Halving> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing == Some(loss) {
            return Err(Error::Diverged {
                epoch: 0,
                value: f64::NAN,
            });
        }
        Ok(Halving { width })
    }
}

#[test]
fn single_configuration_end_to_end() {
    let data = Dataset::synthetic(&SyntheticSpec::default());
    let pair = LossPair::new(LossKind::ConsensusMse, LossKind::ConsensusMse);
    let config = small_config(WidthRange::new(3, 4, 1), vec![pair]);

    let outcome = Sweep::from_config(config).run(&data).unwrap();

    assert_eq!(outcome.matrix.dim(), (1, 1));
    let summary = outcome.cells[0].summary.as_ref().unwrap();
    assert_eq!(summary.rocs.len(), 2);
    assert!(summary.mean_roc > 0.5, "mean ROC {}", summary.mean_roc);
    assert_abs_diff_eq!(outcome.matrix[[0, 0]], summary.mean_roc, epsilon = 1e-12);
    assert_abs_diff_eq!(
        summary.mean_roc,
        summary.rocs.iter().sum::<f64>() / 2.0,
        epsilon = 1e-12
    );
    assert_eq!(summary.mean_scores.len(), data.test.nrows());
}

#[test]
fn two_pairs_one_width_fill_the_matrix() {
    let data = Dataset::synthetic(&SyntheticSpec::default());
    let pairs = vec![
        LossPair::new(LossKind::MemberMse, LossKind::ConsensusMse),
        LossPair::new(LossKind::MaxMse, LossKind::MaxMse),
    ];
    let mut config = small_config(WidthRange::new(3, 6, 3), pairs);
    config.num_runs = 1;
    config.training.epochs = 2;

    let outcome = Sweep::from_config(config).run(&data).unwrap();

    assert_eq!(outcome.widths, vec![3]);
    assert_eq!(outcome.matrix.dim(), (1, 2));
    assert!(outcome.matrix.iter().all(|v| v.is_finite()));
    assert_eq!(
        outcome.pair_labels(),
        vec!["member_mse-consensus_mse".to_string(), "max_mse-max_mse".to_string()]
    );
}

#[test]
fn single_class_test_labels_fail_before_training() {
    let synthetic = Dataset::synthetic(&SyntheticSpec::default());
    let data = Dataset {
        test_labels: Array1::zeros(synthetic.test.nrows()),
        ..synthetic
    };
    let trainer = ScriptedTrainer::new(None);
    let config = small_config(WidthRange::new(3, 6, 3), LossPair::default_set());

    let err = Sweep::new(config, trainer).run(&data).unwrap_err();
    assert!(matches!(err, Error::DegenerateLabels { class: 0 }));
}

#[test]
fn pairwise_loss_at_width_one_is_rejected_before_training() {
    let data = Dataset::synthetic(&SyntheticSpec::default());
    let config = small_config(
        WidthRange::new(1, 4, 1),
        vec![
            LossPair::new(LossKind::MemberMse, LossKind::ConsensusMse),
            LossPair::new(LossKind::PairwiseReduced, LossKind::ConsensusMse),
        ],
    );
    let sweep = Sweep::new(config, ScriptedTrainer::new(None));

    let err = sweep.run(&data).unwrap_err();
    assert!(err.is_config(), "{err}");
}

#[test]
fn isolate_policy_leaves_nan_and_continues() {
    let data = Dataset::synthetic(&SyntheticSpec::default());
    let pairs = vec![
        LossPair::new(LossKind::MemberMse, LossKind::ConsensusMse),
        LossPair::new(LossKind::MaxMse, LossKind::MaxMse),
    ];
    let mut config = small_config(WidthRange::new(2, 5, 2), pairs);
    config.failure_policy = FailurePolicy::Isolate;

    let sweep = Sweep::new(config.clone(), ScriptedTrainer::new(Some(LossKind::MaxMse)));
    let outcome = sweep.run(&data).unwrap();
    assert_eq!(outcome.matrix.dim(), (2, 2));
    for row in outcome.matrix.outer_iter() {
        assert_eq!(row[0], 1.0);
        assert!(row[1].is_nan());
    }
    assert_eq!(outcome.cells.iter().filter(|c| c.error.is_some()).count(), 2);

    config.failure_policy = FailurePolicy::Abort;
    let trainer = ScriptedTrainer::new(Some(LossKind::MaxMse));
    let err = Sweep::new(config, trainer).run(&data).unwrap_err();
    assert!(matches!(err, Error::Diverged { .. }));
}

#[test]
fn runs_per_cell_follow_the_configuration() {
    let data = Dataset::synthetic(&SyntheticSpec::default());
    let mut config = small_config(WidthRange::new(2, 8, 2), LossPair::default_set()[..3].to_vec());
    config.num_runs = 4;
    let sweep = Sweep::new(config, ScriptedTrainer::new(None));
    let outcome = sweep.run(&data).unwrap();
    assert_eq!(outcome.matrix.dim(), (3, 3));
    let calls = outcome.cells.iter().map(|c| c.summary.as_ref().unwrap().rocs.len()).sum::<usize>();
    assert_eq!(calls, 3 * 3 * 4);
}

#[test]
fn persisted_matrix_reads_back() {
    let data = Dataset::synthetic(&SyntheticSpec::default());
    let pairs = vec![
        LossPair::new(LossKind::MemberMse, LossKind::ConsensusMse),
        LossPair::new(LossKind::MeanBias, LossKind::ConsensusMse),
    ];
    let config = small_config(WidthRange::new(2, 5, 2), pairs);
    let outcome = Sweep::new(config, ScriptedTrainer::new(None)).run(&data).unwrap();

    let dir = tempdir().unwrap();
    let paths = OutputPaths {
        matrix: dir.path().join("out").join("loss_ens.npy"),
        report: Some(dir.path().join("report.json")),
        plot_dir: Some(dir.path().join("plots")),
    };
    outcome.persist(&paths).unwrap();

    let matrix: Array2<f64> = ndarray_npy::read_npy(&paths.matrix).unwrap();
    assert_eq!(matrix, outcome.matrix);

    let report: serde_json::Value =
        serde_json::from_reader(std::fs::File::open(paths.report.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(report["widths"], serde_json::json!([2, 4]));
    assert_eq!(report["pairs"][1], "mean_bias-consensus_mse");
    assert_eq!(report["cells"].as_array().unwrap().len(), 4);

    #[cfg(feature = "plot")]
    {
        assert!(dir.path().join("plots").join("loss_ens.svg").exists());
        assert!(dir.path().join("plots").join("loss_ens_2.svg").exists());
    }
}
