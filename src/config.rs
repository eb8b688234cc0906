//! Sweep configuration.
//!
//! Every field has a default, so a JSON file
//! only needs the values that differ.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::losses::LossPair;

/// Layer sizes and regularisation of every ensemble member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub encoding_dim: usize,
    pub hidden_dim_1: usize,
    pub hidden_dim_2: usize,
    pub dropout: f64,
    /// L2 activity penalty on the first encoder layer.
    pub activity_l2: f64,
    pub leaky_relu_alpha: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            encoding_dim: 14,
            hidden_dim_1: 7,
            hidden_dim_2: 4,
            dropout: 0.2,
            activity_l2: 1e-7,
            leaky_relu_alpha: 0.2,
        }
    }
}

/// Mini-batch training and early stopping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the training rows held out for early stopping.
    pub validation_split: f64,
    pub learning_rate: f64,
    pub patience: usize,
    pub min_delta: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 100,
            batch_size: 64,
            validation_split: 0.2,
            learning_rate: 1e-3,
            patience: 10,
            min_delta: 1e-4,
        }
    }
}

/// Ensemble widths `start, start + step, ...` strictly below `end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidthRange {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

impl Default for WidthRange {
    fn default() -> Self {
        WidthRange {
            start: 3,
            end: 60,
            step: 3,
        }
    }
}

impl WidthRange {
    pub fn new(start: usize, end: usize, step: usize) -> Self {
        WidthRange { start, end, step }
    }

    pub fn widths(&self) -> Vec<usize> {
        if self.step == 0 {
            return Vec::new();
        }
        (self.start..self.end).step_by(self.step).collect()
    }
}

/// What the sweep does when one configuration fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole sweep on the first error.
    #[default]
    Abort,
    /// Log the error, leave NaN in the cell and move on.
    Isolate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub seed: u64,
    /// Number of shuffled training rows kept per sweep; `None` keeps all.
    pub bag: Option<usize>,
    pub num_runs: usize,
    pub widths: WidthRange,
    pub threshold: f64,
    pub losses: Vec<LossPair>,
    pub failure_policy: FailurePolicy,
    /// Worker threads for member-level numerics; `None` uses every core.
    pub threads: Option<usize>,
    pub network: NetworkConfig,
    pub training: TrainConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            seed: 1121,
            bag: Some(1000),
            num_runs: 10,
            widths: WidthRange::default(),
            threshold: 0.65,
            losses: LossPair::default_set(),
            failure_policy: FailurePolicy::Abort,
            threads: None,
            network: NetworkConfig::default(),
            training: TrainConfig::default(),
        }
    }
}

impl SweepConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: SweepConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Reject configurations that cannot produce a fully populated results matrix.
    pub fn validate(&self) -> Result<()> {
        let widths = self.widths.widths();
        if self.widths.step == 0 {
            return Err(Error::config("width step must be at least 1"));
        }
        let Some(&narrowest) = widths.first() else {
            return Err(Error::config(format!(
                "width range [{}, {}) is empty",
                self.widths.start, self.widths.end
            )));
        };
        if narrowest == 0 {
            return Err(Error::config("ensemble width must be at least 1"));
        }
        if self.losses.is_empty() {
            return Err(Error::config("no loss pairs configured"));
        }
        for pair in &self.losses {
            pair.train.validate_width(narrowest)?;
            pair.predict.validate_width(narrowest)?;
        }
        if self.num_runs == 0 {
            return Err(Error::config("num_runs must be at least 1"));
        }
        if self.bag == Some(0) {
            return Err(Error::config("bag must keep at least one row"));
        }
        if !self.threshold.is_finite() {
            return Err(Error::config("threshold must be finite"));
        }
        if self.threads == Some(0) {
            return Err(Error::config("threads must be at least 1"));
        }
        self.network.validate()?;
        self.training.validate()
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.encoding_dim == 0 || self.hidden_dim_1 == 0 || self.hidden_dim_2 == 0 {
            return Err(Error::config("layer sizes must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::config(format!("dropout {} outside [0, 1)", self.dropout)));
        }
        if self.activity_l2 < 0.0 {
            return Err(Error::config("activity_l2 must be non-negative"));
        }
        Ok(())
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::config("epochs and batch_size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(Error::config(format!(
                "validation_split {} outside [0, 1)",
                self.validation_split
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate must be positive"));
        }
        Ok(())
    }
}
