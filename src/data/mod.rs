//! Training streams.
//!
//! A [`Dataset`] is an immutable, validated sequence of `(x1, x2, target)`
//! samples, stored the way the rest of the crate consumes them: an `n x 2`
//! input matrix and a length-`n` target vector.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::{NeuronError, NeuronResult};
use crate::training::PredictionPoint;

/// Length of the canonical declining sequence.
pub const SEQUENCE_LEN: usize = 10;

/// Spacing of `x1` across the declining sequence.
const X1_STEP: f64 = 0.1;

/// Constant second input of the declining sequence.
const X2_CONSTANT: f64 = 0.5;

/// One training example.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub x1: f64,
    pub x2: f64,
    /// Desired output, in [0, 1]
    pub target: f64,
}

/// Fixed, ordered training stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Array2<f64>,
    targets: Array1<f64>,
}

impl Dataset {
    /// Build a dataset from an `n x 2` input matrix and `n` targets.
    ///
    /// # Errors
    /// - `ShapeMismatch` if inputs are not two columns wide or row counts differ
    /// - `InvalidConfig` if the dataset is empty
    /// - `InvalidTarget` if an input is not finite or a target is outside [0, 1]
    pub fn new(inputs: Array2<f64>, targets: Array1<f64>) -> NeuronResult<Self> {
        if inputs.ncols() != 2 {
            return Err(NeuronError::ShapeMismatch(format!(
                "Input columns: expected 2, got {}",
                inputs.ncols()
            )));
        }
        if inputs.nrows() != targets.len() {
            return Err(NeuronError::ShapeMismatch(format!(
                "Samples mismatch: inputs={}, targets={}",
                inputs.nrows(),
                targets.len()
            )));
        }
        if targets.is_empty() {
            return Err(NeuronError::InvalidConfig(
                "Dataset must contain at least one sample".to_string(),
            ));
        }

        for (index, row) in inputs.outer_iter().enumerate() {
            if let Some(&value) = row.iter().find(|v| !v.is_finite()) {
                return Err(NeuronError::InvalidTarget { index, value });
            }
        }
        for (index, &value) in targets.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(NeuronError::InvalidTarget { index, value });
            }
        }

        Ok(Self { inputs, targets })
    }

    /// Build a dataset from individual samples.
    pub fn from_samples(samples: &[TrainingSample]) -> NeuronResult<Self> {
        let mut inputs = Array2::zeros((samples.len(), 2));
        let mut targets = Array1::zeros(samples.len());
        for (i, s) in samples.iter().enumerate() {
            inputs[[i, 0]] = s.x1;
            inputs[[i, 1]] = s.x2;
            targets[i] = s.target;
        }
        Self::new(inputs, targets)
    }

    /// Declining target stream of `n` samples.
    ///
    /// `x1 = i * 0.1`, `x2 = 0.5`, `target = 1 - i / (n - 1)`.
    ///
    /// # Errors
    /// - `InvalidConfig` if `n < 2`
    #[allow(clippy::cast_precision_loss)]
    pub fn declining(n: usize) -> NeuronResult<Self> {
        if n < 2 {
            return Err(NeuronError::InvalidConfig(format!(
                "Declining sequence needs at least 2 samples, got {n}"
            )));
        }
        let last = (n - 1) as f64;
        let samples: Vec<TrainingSample> = (0..n)
            .map(|i| TrainingSample {
                x1: i as f64 * X1_STEP,
                x2: X2_CONSTANT,
                target: 1.0 - i as f64 / last,
            })
            .collect();
        Self::from_samples(&samples)
    }

    /// The canonical ten-sample declining stream.
    #[allow(clippy::cast_precision_loss)]
    pub fn declining_sequence() -> Self {
        let last = (SEQUENCE_LEN - 1) as f64;
        let inputs = Array2::from_shape_fn((SEQUENCE_LEN, 2), |(i, j)| match j {
            0 => i as f64 * X1_STEP,
            _ => X2_CONSTANT,
        });
        let targets = Array1::from_shape_fn(SEQUENCE_LEN, |i| 1.0 - i as f64 / last);
        Self { inputs, targets }
    }

    /// Ten samples of the OR function, used by the batch demo.
    pub fn or_gate() -> Self {
        const TRUTH_TABLE: [(f64, f64, f64); 4] = [
            (0.0, 0.0, 0.0),
            (0.0, 1.0, 1.0),
            (1.0, 0.0, 1.0),
            (1.0, 1.0, 1.0),
        ];
        let rows = TRUTH_TABLE.iter().cycle().take(SEQUENCE_LEN);
        let mut inputs = Array2::zeros((SEQUENCE_LEN, 2));
        let mut targets = Array1::zeros(SEQUENCE_LEN);
        for (i, &(x1, x2, t)) in rows.enumerate() {
            inputs[[i, 0]] = x1;
            inputs[[i, 1]] = x2;
            targets[i] = t;
        }
        Self { inputs, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    pub fn targets(&self) -> &Array1<f64> {
        &self.targets
    }

    /// Sample at `index`, or `None` when out of bounds.
    pub fn get(&self, index: usize) -> Option<TrainingSample> {
        (index < self.len()).then(|| TrainingSample {
            x1: self.inputs[[index, 0]],
            x2: self.inputs[[index, 1]],
            target: self.targets[index],
        })
    }

    /// Samples in stream order.
    pub fn iter(&self) -> impl Iterator<Item = TrainingSample> + '_ {
        self.inputs
            .outer_iter()
            .zip(self.targets.iter())
            .map(|(row, &target)| TrainingSample {
                x1: row[0],
                x2: row[1],
                target,
            })
    }

    /// `(index, target)` points of the target curve, for plotting.
    pub fn target_curve(&self) -> Vec<PredictionPoint> {
        self.targets
            .iter()
            .enumerate()
            .map(|(index, &value)| PredictionPoint { index, value })
            .collect()
    }
}
