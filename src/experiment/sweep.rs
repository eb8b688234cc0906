use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use ndarray_npy::write_npy;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{FailurePolicy, SweepConfig};
use crate::data::Dataset;
use crate::error::Result;
use crate::experiment::runner::{ConfigSummary, RunAggregator};
use crate::losses::LossPair;
use crate::models::base_model::EnsembleTrainer;
use crate::models::trainer::AutoencoderTrainer;
use crate::utils::evaluation::check_both_classes;

/// Mean ROC-AUC per (width, loss pair); rows are widths, columns pairs.
pub type ResultsMatrix = Array2<f64>;

/// Outcome of one cell of the sweep.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellResult {
    pub width: usize,
    pub pair: LossPair,
    pub summary: Option<ConfigSummary>,
    /// Set when the cell was isolated after a failure.
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SweepOutcome {
    pub widths: Vec<usize>,
    pub pairs: Vec<LossPair>,
    pub matrix: ResultsMatrix,
    pub cells: Vec<CellResult>,
}

/// Where [`SweepOutcome::persist`] writes its artifacts.
#[derive(Clone, Debug, Default)]
pub struct OutputPaths {
    pub matrix: PathBuf,
    pub report: Option<PathBuf>,
    pub plot_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct SweepReport<'a> {
    widths: &'a [usize],
    pairs: Vec<String>,
    matrix: Vec<Vec<f64>>,
    cells: &'a [CellResult],
}

impl SweepOutcome {
    pub fn pair_labels(&self) -> Vec<String> {
        self.pairs.iter().map(LossPair::label).collect()
    }

    /// Column of the results matrix for `pair_index`, as (width, mean ROC) points.
    pub fn series(&self, pair_index: usize) -> Vec<(usize, f64)> {
        self.widths
            .iter()
            .zip(self.matrix.column(pair_index))
            .map(|(&w, &roc)| (w, roc))
            .collect()
    }

    pub fn write_matrix(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        create_parent(path)?;
        write_npy(path, &self.matrix)?;
        Ok(())
    }

    pub fn write_report(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        create_parent(path)?;
        let report = SweepReport {
            widths: &self.widths,
            pairs: self.pair_labels(),
            matrix: self.matrix.outer_iter().map(|row| row.to_vec()).collect(),
            cells: &self.cells,
        };
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &report)?;
        Ok(())
    }

    /// Write the matrix, then the optional report and plots.
    pub fn persist(&self, paths: &OutputPaths) -> Result<()> {
        self.write_matrix(&paths.matrix)?;
        info!(path = %paths.matrix.display(), "results matrix written");
        if let Some(report) = &paths.report {
            self.write_report(report)?;
            info!(path = %report.display(), "report written");
        }
        if let Some(dir) = &paths.plot_dir {
            self.write_plots(dir)?;
        }
        Ok(())
    }

    #[cfg(feature = "plot")]
    fn write_plots(&self, dir: &Path) -> Result<()> {
        let written = crate::experiment::plot::write_comparison_plots(self, dir)?;
        for path in written {
            info!(path = %path.display(), "plot written");
        }
        Ok(())
    }

    #[cfg(not(feature = "plot"))]
    fn write_plots(&self, dir: &Path) -> Result<()> {
        warn!(dir = %dir.display(), "built without the `plot` feature, skipping plots");
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// The full cross product of ensemble widths and loss pairs.
pub struct Sweep<T: EnsembleTrainer> {
    config: SweepConfig,
    trainer: T,
}

impl Sweep<AutoencoderTrainer> {
    pub fn from_config(config: SweepConfig) -> Self {
        let trainer = AutoencoderTrainer::new(config.network.clone(), config.training.clone());
        Sweep { config, trainer }
    }
}

impl<T: EnsembleTrainer + Sync> Sweep<T> {
    pub fn new(config: SweepConfig, trainer: T) -> Self {
        Sweep { config, trainer }
    }

    /// Fill the results matrix for `data`.
    ///
    /// The configuration and the test labels are checked before any model is
    /// trained. Cells are computed one after the other; member passes inside
    /// each model use a rayon pool of `config.thread_count()` threads.
    pub fn run(&self, data: &Dataset) -> Result<SweepOutcome> {
        self.config.validate()?;
        check_both_classes(data.test_labels.view())?;

        let bagged;
        let data = match self.config.bag {
            Some(bag) => {
                bagged = data.bagged(bag, self.config.seed);
                &bagged
            }
            None => data,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_count())
            .build()?;
        pool.install(|| self.fill(data))
    }

    fn fill(&self, data: &Dataset) -> Result<SweepOutcome> {
        let widths = self.config.widths.widths();
        let pairs = self.config.losses.clone();
        let runner = RunAggregator::from_config(&self.trainer, &self.config);
        info!(
            widths = widths.len(),
            pairs = pairs.len(),
            runs = self.config.num_runs,
            train_rows = data.train.nrows(),
            test_rows = data.test.nrows(),
            "sweep started"
        );

        let mut matrix = Array2::from_elem((widths.len(), pairs.len()), f64::NAN);
        let mut cells = Vec::with_capacity(widths.len() * pairs.len());
        for (wi, &width) in widths.iter().enumerate() {
            for (pi, &pair) in pairs.iter().enumerate() {
                match runner.evaluate(width, pi, pair, data) {
                    Ok(summary) => {
                        matrix[[wi, pi]] = summary.mean_roc;
                        cells.push(CellResult {
                            width,
                            pair,
                            summary: Some(summary),
                            error: None,
                        });
                    }
                    Err(err) => match self.config.failure_policy {
                        FailurePolicy::Abort => return Err(err),
                        FailurePolicy::Isolate => {
                            warn!(width, pair = %pair, error = %err, "configuration failed, cell left as NaN");
                            cells.push(CellResult {
                                width,
                                pair,
                                summary: None,
                                error: Some(err.to_string()),
                            });
                        }
                    },
                }
            }
        }

        info!(failed = cells.iter().filter(|c| c.error.is_some()).count(), "sweep finished");
        Ok(SweepOutcome {
            widths,
            pairs,
            matrix,
            cells,
        })
    }
}
