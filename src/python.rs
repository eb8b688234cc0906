use ndarray::{Array1, Array2, Array3};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyArray3};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;

use crate::config::{SweepConfig, WidthRange};
use crate::data::Dataset;
use crate::error::Error;
use crate::experiment::Sweep;
use crate::losses::{LossKind, Mode};

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        match err {
            Error::Io(_) | Error::ReadNpz(_) | Error::WriteNpy(_) | Error::WriteNpz(_) => {
                PyIOError::new_err(err.to_string())
            }
            Error::Diverged { .. } | Error::Candle(_) | Error::ThreadPool(_) | Error::Plot(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

// Helper functions to get f64 arrays from PyAny (handles casting)
fn get_array2_f64(x: &PyAny, name: &str) -> PyResult<Array2<f64>> {
    if let Ok(arr) = x.extract::<&PyArray2<f64>>() {
        Ok(arr.to_owned_array())
    } else if let Ok(arr) = x.extract::<&PyArray2<f32>>() {
        Ok(arr.cast::<f64>(false)?.to_owned_array())
    } else if let Ok(arr) = x.extract::<&PyArray2<i64>>() {
        Ok(arr.cast::<f64>(false)?.to_owned_array())
    } else if let Ok(arr) = x.extract::<&PyArray2<i32>>() {
        Ok(arr.cast::<f64>(false)?.to_owned_array())
    } else {
        Err(PyTypeError::new_err(format!(
            "Unsupported array for '{}': expected a 2-D f64 or compatible (f32, i64, i32) array",
            name
        )))
    }
}

fn get_array3_f64(x: &PyAny, name: &str) -> PyResult<Array3<f64>> {
    if let Ok(arr) = x.extract::<&PyArray3<f64>>() {
        Ok(arr.to_owned_array())
    } else if let Ok(arr) = x.extract::<&PyArray3<f32>>() {
        Ok(arr.cast::<f64>(false)?.to_owned_array())
    } else {
        Err(PyTypeError::new_err(format!(
            "Unsupported array for '{}': expected a 3-D f64 or f32 array",
            name
        )))
    }
}

fn get_labels(x: &PyAny) -> PyResult<Array1<u8>> {
    let raw: Array1<f64> = if let Ok(arr) = x.extract::<&PyArray1<f64>>() {
        arr.to_owned_array()
    } else if let Ok(arr) = x.extract::<&PyArray1<i64>>() {
        arr.cast::<f64>(false)?.to_owned_array()
    } else if let Ok(arr) = x.extract::<&PyArray1<i32>>() {
        arr.cast::<f64>(false)?.to_owned_array()
    } else if let Ok(arr) = x.extract::<&PyArray1<u8>>() {
        arr.cast::<f64>(false)?.to_owned_array()
    } else if let Ok(arr) = x.extract::<&PyArray1<bool>>() {
        arr.to_owned_array().mapv(|v| if v { 1.0 } else { 0.0 })
    } else {
        return Err(PyTypeError::new_err(
            "Unsupported array for 'ty': expected a 1-D array of 0/1 labels",
        ));
    };
    raw.iter()
        .map(|&v| match v {
            v if v == 0.0 => Ok(0u8),
            v if v == 1.0 => Ok(1u8),
            v => Err(PyValueError::new_err(format!("test label {} is not 0 or 1", v))),
        })
        .collect::<PyResult<Vec<u8>>>()
        .map(Array1::from_vec)
}

/// Evaluate one loss on `reference` (batch, feature) and `outputs` (batch, feature, member).
///
/// Returns a float in training mode and a per-example numpy array otherwise.
#[pyfunction]
#[pyo3(signature = (kind, reference, outputs, training=true))]
pub fn ensemble_loss(py: Python<'_>, kind: &str, reference: &PyAny, outputs: &PyAny, training: bool) -> PyResult<PyObject> {
    let kind: LossKind = kind.parse()?;
    let reference = get_array2_f64(reference, "reference")?;
    let outputs = get_array3_f64(outputs, "outputs")?;
    let mode = if training { Mode::Training } else { Mode::Prediction };
    let result = kind.evaluate(reference.view(), outputs.view(), mode)?;
    match (result.scalar(), result.per_example()) {
        (Some(value), _) => Ok(value.into_py(py)),
        (None, Some(scores)) => Ok(scores.clone().into_pyarray(py).into_py(py)),
        (None, None) => Err(PyRuntimeError::new_err("loss produced no value")),
    }
}

/// Python-exposed wrapper around the width x loss-pair sweep
#[pyclass]
pub struct LossSweep {
    config: SweepConfig,
}

#[pymethods]
impl LossSweep {
    #[new]
    #[pyo3(signature = (width_start=3, width_end=60, width_step=3, num_runs=10, epochs=100, threshold=0.65, bag=Some(1000), random_state=1121, config_json=None))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        width_start: usize,
        width_end: usize,
        width_step: usize,
        num_runs: usize,
        epochs: usize,
        threshold: f64,
        bag: Option<usize>,
        random_state: u64,
        config_json: Option<&str>,
    ) -> PyResult<Self> {
        let mut config = match config_json {
            Some(path) => SweepConfig::from_json_file(path)?,
            None => SweepConfig::default(),
        };
        config.widths = WidthRange::new(width_start, width_end, width_step);
        config.num_runs = num_runs;
        config.training.epochs = epochs;
        config.threshold = threshold;
        config.bag = bag;
        config.seed = random_state;
        config.validate()?;
        Ok(LossSweep { config })
    }

    /// Run the sweep and return the (width, loss pair) matrix of mean ROC-AUC.
    fn run<'py>(&self, py: Python<'py>, x: &PyAny, tx: &PyAny, ty: &PyAny) -> PyResult<&'py PyArray2<f64>> {
        let data = Dataset::new(get_array2_f64(x, "x")?, get_array2_f64(tx, "tx")?, get_labels(ty)?)?;
        let sweep = Sweep::from_config(self.config.clone());
        let outcome = py.allow_threads(move || sweep.run(&data))?;
        Ok(outcome.matrix.into_pyarray(py))
    }

    fn widths(&self) -> Vec<usize> {
        self.config.widths.widths()
    }

    fn pair_labels(&self) -> Vec<String> {
        self.config.losses.iter().map(|p| p.label()).collect()
    }
}
