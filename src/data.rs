//! Train/test datasets and their NPZ archive format.
//!
//! An archive holds `x` (training features), `tx` (test features) and `ty`
//! (binary test labels, 1 = anomaly). Training labels are never needed.

use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array2, Axis, Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{Error, Result};

pub const TRAIN_KEY: &str = "x";
pub const TEST_KEY: &str = "tx";
pub const LABEL_KEY: &str = "ty";

#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub train: Array2<f64>,
    pub test: Array2<f64>,
    pub test_labels: Array1<u8>,
}

impl Dataset {
    /// Validate shapes and values and build a dataset.
    pub fn new(train: Array2<f64>, test: Array2<f64>, test_labels: Array1<u8>) -> Result<Self> {
        if train.nrows() == 0 || train.ncols() == 0 {
            return Err(Error::invalid_data("training features are empty"));
        }
        if test.nrows() == 0 {
            return Err(Error::invalid_data("test features are empty"));
        }
        if test.ncols() != train.ncols() {
            return Err(Error::shape_mismatch(
                format!("{} test features (training width)", train.ncols()),
                format!("{} test features", test.ncols()),
            ));
        }
        if test_labels.len() != test.nrows() {
            return Err(Error::shape_mismatch(
                format!("{} test labels", test.nrows()),
                format!("{} test labels", test_labels.len()),
            ));
        }
        if let Some(bad) = test_labels.iter().find(|&&l| l > 1) {
            return Err(Error::invalid_data(format!("test label {} is not 0 or 1", bad)));
        }
        if train.iter().chain(test.iter()).any(|v| !v.is_finite()) {
            return Err(Error::invalid_data("features contain non-finite values"));
        }
        Ok(Dataset {
            train,
            test,
            test_labels,
        })
    }

    pub fn load_npz(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut npz = NpzReader::new(File::open(path)?)?;
        let train = read_features(&mut npz, path, TRAIN_KEY)?;
        let test = read_features(&mut npz, path, TEST_KEY)?;
        let labels = read_labels(&mut npz, path, LABEL_KEY)?;
        debug!(
            path = %path.display(),
            train_rows = train.nrows(),
            test_rows = test.nrows(),
            features = train.ncols(),
            "loaded dataset"
        );
        Dataset::new(train, test, labels)
    }

    pub fn save_npz(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array(TRAIN_KEY, &self.train)?;
        npz.add_array(TEST_KEY, &self.test)?;
        npz.add_array(LABEL_KEY, &self.test_labels)?;
        npz.finish()?;
        Ok(())
    }

    pub fn features(&self) -> usize {
        self.train.ncols()
    }

    pub fn anomalies(&self) -> usize {
        self.test_labels.iter().filter(|&&l| l == 1).count()
    }

    /// Shuffle the training rows with `seed` and keep the first `bag` of them.
    pub fn bagged(&self, bag: usize, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> = (0..self.train.nrows()).collect();
        indices.shuffle(&mut rng);
        indices.truncate(bag.max(1));
        Dataset {
            train: self.train.select(Axis(0), &indices),
            test: self.test.clone(),
            test_labels: self.test_labels.clone(),
        }
    }

    /// Uniform normal rows and scaled anomalous rows, see [`SyntheticSpec`].
    pub fn synthetic(spec: &SyntheticSpec) -> Dataset {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let normal_row = |rng: &mut StdRng| -> Vec<f64> {
            (0..spec.features).map(|_| rng.gen_range(0.2..1.0)).collect()
        };

        let mut train = Vec::with_capacity(spec.train_rows * spec.features);
        for _ in 0..spec.train_rows {
            train.extend(normal_row(&mut rng));
        }

        let test_rows = spec.test_normal + spec.test_anomalous;
        let mut test = Vec::with_capacity(test_rows * spec.features);
        let mut labels = Vec::with_capacity(test_rows);
        for _ in 0..spec.test_normal {
            test.extend(normal_row(&mut rng));
            labels.push(0u8);
        }
        for _ in 0..spec.test_anomalous {
            test.extend(normal_row(&mut rng).into_iter().map(|v| v * spec.anomaly_scale));
            labels.push(1u8);
        }

        Dataset {
            train: Array2::from_shape_vec((spec.train_rows, spec.features), train)
                .unwrap_or_else(|_| Array2::zeros((0, spec.features))),
            test: Array2::from_shape_vec((test_rows, spec.features), test)
                .unwrap_or_else(|_| Array2::zeros((0, spec.features))),
            test_labels: Array1::from_vec(labels),
        }
    }
}

/// Shape of a generated dataset.
///
/// Normal features are uniform in `[0.2, 1.0)`; anomalous rows are normal
/// rows multiplied by `anomaly_scale`.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticSpec {
    pub train_rows: usize,
    pub test_normal: usize,
    pub test_anomalous: usize,
    pub features: usize,
    pub anomaly_scale: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        SyntheticSpec {
            train_rows: 100,
            test_normal: 20,
            test_anomalous: 5,
            features: 8,
            anomaly_scale: 5.0,
            seed: 1121,
        }
    }
}

/// Archive entry for `key`, accepting names with or without the `.npy` suffix.
fn entry_name(npz: &mut NpzReader<File>, path: &Path, key: &str) -> Result<String> {
    npz.names()?
        .into_iter()
        .find(|name| name == key || name.strip_suffix(".npy") == Some(key))
        .ok_or_else(|| Error::MissingArray {
            path: path.to_path_buf(),
            name: key.to_string(),
        })
}

// Feature arrays stored with a numeric dtype other than f64 are cast.
fn read_features(npz: &mut NpzReader<File>, path: &Path, key: &str) -> Result<Array2<f64>> {
    let name = entry_name(npz, path, key)?;
    if let Ok(arr) = npz.by_name::<OwnedRepr<f64>, Ix2>(&name) {
        return Ok(arr);
    }
    if let Ok(arr) = npz.by_name::<OwnedRepr<f32>, Ix2>(&name) {
        return Ok(arr.mapv(f64::from));
    }
    if let Ok(arr) = npz.by_name::<OwnedRepr<i64>, Ix2>(&name) {
        return Ok(arr.mapv(|v| v as f64));
    }
    let arr = npz.by_name::<OwnedRepr<i32>, Ix2>(&name)?;
    Ok(arr.mapv(f64::from))
}

fn read_labels(npz: &mut NpzReader<File>, path: &Path, key: &str) -> Result<Array1<u8>> {
    let name = entry_name(npz, path, key)?;
    let raw: Array1<f64> = if let Ok(arr) = npz.by_name::<OwnedRepr<f64>, Ix1>(&name) {
        arr
    } else if let Ok(arr) = npz.by_name::<OwnedRepr<u8>, Ix1>(&name) {
        arr.mapv(f64::from)
    } else if let Ok(arr) = npz.by_name::<OwnedRepr<i64>, Ix1>(&name) {
        arr.mapv(|v| v as f64)
    } else if let Ok(arr) = npz.by_name::<OwnedRepr<bool>, Ix1>(&name) {
        arr.mapv(|v| if v { 1.0 } else { 0.0 })
    } else {
        npz.by_name::<OwnedRepr<i32>, Ix1>(&name)?.mapv(f64::from)
    };

    raw.iter()
        .map(|&v| {
            if v == 0.0 {
                Ok(0u8)
            } else if v == 1.0 {
                Ok(1u8)
            } else {
                Err(Error::invalid_data(format!("test label {} is not 0 or 1", v)))
            }
        })
        .collect::<Result<Vec<u8>>>()
        .map(Array1::from_vec)
}
