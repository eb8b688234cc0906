//! Repeated runs per configuration and the width x loss-pair sweep over them.

#[cfg(feature = "plot")]
pub mod plot;
pub mod runner;
pub mod sweep;

pub use runner::{derive_seed, ConfigSummary, RunAggregator};
pub use sweep::{CellResult, OutputPaths, ResultsMatrix, Sweep, SweepOutcome};
