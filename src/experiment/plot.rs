//! SVG line charts of mean ROC-AUC against ensemble width.

use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::error::{Error, Result};
use crate::experiment::sweep::SweepOutcome;

pub const ALL_PAIRS_FILE: &str = "loss_ens.svg";
pub const FIRST_PAIRS_FILE: &str = "loss_ens_2.svg";

/// Number of pairs drawn in the reduced chart.
const FIRST_PAIRS: usize = 4;

fn plot_err<E: std::fmt::Display>(err: E) -> Error {
    Error::Plot(err.to_string())
}

/// Write the chart of every pair and the chart of the first four pairs into `dir`.
pub fn write_comparison_plots(outcome: &SweepOutcome, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let all = dir.join(ALL_PAIRS_FILE);
    draw_roc_chart(outcome, outcome.pairs.len(), &all)?;
    let first = dir.join(FIRST_PAIRS_FILE);
    draw_roc_chart(outcome, FIRST_PAIRS.min(outcome.pairs.len()), &first)?;
    Ok(vec![all, first])
}

/// One line per loss pair among the first `pair_count`; NaN cells are skipped.
pub fn draw_roc_chart(outcome: &SweepOutcome, pair_count: usize, out_path: &Path) -> Result<()> {
    let x_min = outcome.widths.first().copied().unwrap_or(0) as f64;
    let x_max = outcome.widths.last().copied().unwrap_or(1) as f64;
    let x_range = if x_max > x_min { x_min..x_max } else { (x_min - 1.0)..(x_min + 1.0) };

    let finite = || {
        outcome
            .matrix
            .columns()
            .into_iter()
            .take(pair_count)
            .flat_map(|c| c.to_vec())
            .filter(|v| v.is_finite())
    };
    let y_lo = finite().fold(f64::INFINITY, f64::min);
    let y_hi = finite().fold(f64::NEG_INFINITY, f64::max);
    let (y_lo, y_hi) = if y_lo.is_finite() && y_hi.is_finite() {
        ((y_lo - 0.05).max(0.0), (y_hi + 0.05).min(1.0))
    } else {
        (0.0, 1.0)
    };

    let root = SVGBackend::new(out_path, (1200, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Mean ROC-AUC by ensemble width", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_lo..y_hi)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("ensemble width")
        .y_desc("mean ROC-AUC")
        .draw()
        .map_err(plot_err)?;

    for (i, pair) in outcome.pairs.iter().take(pair_count).enumerate() {
        let color = Palette99::pick(i).mix(0.9);
        let points: Vec<(f64, f64)> = outcome
            .series(i)
            .into_iter()
            .filter(|(_, roc)| roc.is_finite())
            .map(|(w, roc)| (w as f64, roc))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))
            .map_err(plot_err)?
            .label(pair.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::losses::LossPair;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn writes_both_charts() {
        let pairs = LossPair::default_set();
        let outcome = SweepOutcome {
            widths: vec![3, 6],
            matrix: array![
                [0.7, 0.71, 0.72, 0.73, 0.74, 0.75, f64::NAN],
                [0.8, 0.81, 0.82, 0.83, 0.84, 0.85, 0.86]
            ],
            pairs,
            cells: Vec::new(),
        };
        let dir = tempdir().unwrap();
        let written = write_comparison_plots(&outcome, dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        for path in written {
            let svg = fs::read_to_string(path).unwrap();
            assert!(svg.contains("<svg"));
        }
    }
}
