//! Sweep ensemble widths and loss pairs over a dataset and save the
//! matrix of mean ROC-AUC.
//!
//! ```bash
//! ensemble-sweep --data cardio.npz --output results/loss_ens.npy --plot-dir results
//! RUST_LOG=ensemble_ae=debug ensemble-sweep --synthetic --runs 2 --width-end 7
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ensemble_ae::{Dataset, FailurePolicy, OutputPaths, Result, Sweep, SweepConfig, SweepOutcome, SyntheticSpec};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ensemble-sweep")]
#[command(about = "Compare ensemble autoencoder losses across ensemble widths")]
#[command(version)]
struct Args {
    /// NPZ archive with arrays x, tx and ty
    #[arg(long, value_name = "FILE", required_unless_present = "synthetic")]
    data: Option<PathBuf>,

    /// Use a generated dataset instead of --data
    #[arg(long, conflicts_with = "data")]
    synthetic: bool,

    /// JSON sweep configuration; flags below override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to write the results matrix
    #[arg(short, long, default_value = "loss_ens.npy")]
    output: PathBuf,

    /// Also write a JSON report with per-cell summaries
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Directory for the comparison plots
    #[arg(long, value_name = "DIR")]
    plot_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Runs per configuration
    #[arg(long)]
    runs: Option<usize>,

    #[arg(long)]
    width_start: Option<usize>,

    /// Exclusive upper bound of the width range
    #[arg(long)]
    width_end: Option<usize>,

    #[arg(long)]
    width_step: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Score threshold for the per-example predictions
    #[arg(long)]
    threshold: Option<f64>,

    /// Worker threads for member passes (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Leave failed cells as NaN instead of stopping the sweep
    #[arg(long)]
    isolate_failures: bool,
}

impl Args {
    fn sweep_config(&self) -> Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => SweepConfig::from_json_file(path)?,
            None => SweepConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(runs) = self.runs {
            config.num_runs = runs;
        }
        if let Some(start) = self.width_start {
            config.widths.start = start;
        }
        if let Some(end) = self.width_end {
            config.widths.end = end;
        }
        if let Some(step) = self.width_step {
            config.widths.step = step;
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        if self.isolate_failures {
            config.failure_policy = FailurePolicy::Isolate;
        }
        Ok(config)
    }

    fn dataset(&self, seed: u64) -> Result<Dataset> {
        match &self.data {
            Some(path) => Dataset::load_npz(path),
            None => Ok(Dataset::synthetic(&SyntheticSpec {
                seed,
                ..SyntheticSpec::default()
            })),
        }
    }
}

fn print_matrix(outcome: &SweepOutcome) {
    println!("=== Mean ROC-AUC ===\n");
    print!("{:>6}", "width");
    for label in outcome.pair_labels() {
        print!("  {:>32}", label);
    }
    println!();
    for (row, width) in outcome.matrix.outer_iter().zip(&outcome.widths) {
        print!("{:>6}", width);
        for roc in row {
            print!("  {:>32.4}", roc);
        }
        println!();
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.sweep_config()?;
    let data = args.dataset(config.seed)?;
    info!(
        train_rows = data.train.nrows(),
        test_rows = data.test.nrows(),
        features = data.features(),
        anomalies = data.anomalies(),
        "dataset ready"
    );

    let outcome = Sweep::from_config(config).run(&data)?;
    outcome.persist(&OutputPaths {
        matrix: args.output.clone(),
        report: args.report.clone(),
        plot_dir: args.plot_dir.clone(),
    })?;
    print_matrix(&outcome);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ensemble_ae=info,ensemble_sweep=info".into()),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "sweep failed");
            ExitCode::FAILURE
        }
    }
}
