use ensemble_ae::LossKind;
use ndarray::{Array2, Array3, Axis};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const ABS_TOL: f64 = 1e-9;
const REL_TOL: f64 = 1e-9;
const MIN_PROPTEST_CASES: u32 = 256;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn relative_close(actual: f64, expected: f64) -> bool {
    let diff = (actual - expected).abs();
    let scale = 1.0 + expected.abs();
    diff <= ABS_TOL || diff <= REL_TOL * scale
}

/// Reference `(batch, feature)` and ensemble outputs `(batch, feature, member)`.
fn ensemble_case_strategy() -> impl Strategy<Value = (Array2<f64>, Array3<f64>)> {
    (1usize..8, 1usize..6, 2usize..6).prop_flat_map(|(b, f, m)| {
        (
            prop::collection::vec(-2.0f64..2.0, b * f),
            prop::collection::vec(-2.0f64..2.0, b * f * m),
        )
            .prop_map(move |(reference, outputs)| {
                (
                    Array2::from_shape_vec((b, f), reference).unwrap(),
                    Array3::from_shape_vec((b, f, m), outputs).unwrap(),
                )
            })
    })
}

/// An ensemble case together with a random ordering of its members.
fn permuted_case_strategy() -> impl Strategy<Value = (Array2<f64>, Array3<f64>, Vec<usize>)> {
    ensemble_case_strategy().prop_flat_map(|(reference, outputs)| {
        let members = outputs.len_of(Axis(2));
        let order = Just((0..members).collect::<Vec<_>>()).prop_shuffle();
        (Just(reference), Just(outputs), order)
    })
}

fn perfect_outputs(reference: &Array2<f64>, members: usize) -> Array3<f64> {
    let views = vec![reference.view(); members];
    ndarray::stack(Axis(2), &views).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        max_shrink_iters: 1024,
        .. ProptestConfig::default()
    })]

    #[test]
    fn perfect_reconstruction_scores_zero((reference, outputs) in ensemble_case_strategy()) {
        let perfect = perfect_outputs(&reference, outputs.len_of(Axis(2)));
        for kind in LossKind::ALL {
            let loss = kind.training_loss(reference.view(), perfect.view()).unwrap();
            prop_assert_eq!(loss, 0.0, "{} training loss", kind);
            let scores = kind.prediction_scores(reference.view(), perfect.view()).unwrap();
            prop_assert!(scores.iter().all(|&s| s == 0.0), "{} scores {:?}", kind, scores);
        }
    }

    #[test]
    fn losses_ignore_member_permutation((reference, outputs, order) in permuted_case_strategy()) {
        let permuted = outputs.select(Axis(2), &order);
        for kind in LossKind::ALL {
            let original = kind.training_loss(reference.view(), outputs.view()).unwrap();
            let shuffled = kind.training_loss(reference.view(), permuted.view()).unwrap();
            prop_assert!(relative_close(shuffled, original), "{} {:?}: {} vs {}", kind, order, shuffled, original);

            let original = kind.prediction_scores(reference.view(), outputs.view()).unwrap();
            let shuffled = kind.prediction_scores(reference.view(), permuted.view()).unwrap();
            for (s, o) in shuffled.iter().zip(original.iter()) {
                prop_assert!(relative_close(*s, *o), "{} {:?}: {} vs {}", kind, order, s, o);
            }
        }
    }

    #[test]
    fn losses_are_deterministic_and_shaped((reference, outputs) in ensemble_case_strategy()) {
        for kind in LossKind::ALL {
            let first = kind.training_loss(reference.view(), outputs.view()).unwrap();
            let second = kind.training_loss(reference.view(), outputs.view()).unwrap();
            prop_assert_eq!(first.to_bits(), second.to_bits());
            prop_assert!(first >= 0.0);

            let scores = kind.prediction_scores(reference.view(), outputs.view()).unwrap();
            prop_assert_eq!(scores.len(), reference.nrows());
            prop_assert!(scores.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn worst_member_bounds_member_average((reference, outputs) in ensemble_case_strategy()) {
        let worst = LossKind::MaxMse.prediction_scores(reference.view(), outputs.view()).unwrap();
        let average = LossKind::MemberMse.prediction_scores(reference.view(), outputs.view()).unwrap();
        for (w, a) in worst.iter().zip(average.iter()) {
            prop_assert!(*w >= *a - ABS_TOL, "max {} < mean {}", w, a);
        }

        let worst = LossKind::MaxMse.training_loss(reference.view(), outputs.view()).unwrap();
        let average = LossKind::MemberMse.training_loss(reference.view(), outputs.view()).unwrap();
        prop_assert!(worst >= average - ABS_TOL);
    }
}
