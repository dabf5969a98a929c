//! Core neuron implementation.
//!
//! This module provides the single learning unit and the crate error type:
//! - Numerically stable logistic activation
//! - Forward computation of a two-input sigmoid unit
//! - Online (one-sample) gradient-descent update
//!
//! ## Update Rule
//!
//! For one sample `(x1, x2, t)` the unit computes `y = σ(w1·x1 + w2·x2 + b)`
//! and updates its parameters with the delta rule:
//! ```text
//! δ  = (t - y) · y · (1 - y)
//! w1 += η δ x1
//! w2 += η δ x2
//! b  += η δ
//! ```
//!
//! `y · (1 - y)` is σ'(z) expressed through the output, so no second
//! exponential is needed.

use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::training::Phase;

/// Learning rate used when none is configured.
pub const DEFAULT_LEARNING_RATE: f64 = 0.5;

/// Initialization range of a standalone neuron, `[low, high)`.
pub const STANDALONE_INIT_RANGE: (f64, f64) = (-0.5, 5.5);

/// Error type for neuron and training operations.
#[derive(Debug, Error)]
pub enum NeuronError {
    /// Invalid hyperparameter or configuration value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Dataset arrays of the wrong shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Sample value outside its domain
    #[error("Invalid sample {index}: value {value} out of range")]
    InvalidTarget { index: usize, value: f64 },
    /// Operation not allowed in the current training phase
    #[error("Trainer busy: operation not allowed while {0}")]
    Busy(Phase),
    /// Malformed TOML configuration
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// Failed to read a configuration file
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type NeuronResult<T> = Result<T, NeuronError>;

/// Logistic function `1 / (1 + e^-z)`, evaluated without overflow.
///
/// Only `e^-|z|` is ever computed, and the result is clamped so it stays
/// strictly inside (0, 1) where the exact value would round to 0 or 1.
pub fn sigmoid(z: f64) -> f64 {
    let y = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    y.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)
}

/// Snapshot of the three trainable parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub w1: f64,
    pub w2: f64,
    pub bias: f64,
}

impl Parameters {
    /// All-zero parameters; the unit then predicts 0.5 for every input.
    pub const ZERO: Self = Self {
        w1: 0.0,
        w2: 0.0,
        bias: 0.0,
    };
}

/// A two-input sigmoid unit trained online.
///
/// # Invariants
///
/// - `predict` has no side effects
/// - `learn` is the only mutator of `w1`, `w2` and `bias`
/// - `learning_rate` is fixed for the unit's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct SigmoidNeuron {
    w1: f64,
    w2: f64,
    bias: f64,
    learning_rate: f64,
}

impl SigmoidNeuron {
    /// Create a neuron with explicit parameters.
    ///
    /// # Errors
    /// - `InvalidConfig` if `learning_rate` is not finite and positive, or a
    ///   parameter is not finite
    pub fn new(params: Parameters, learning_rate: f64) -> NeuronResult<Self> {
        validate_learning_rate(learning_rate)?;
        if !(params.w1.is_finite() && params.w2.is_finite() && params.bias.is_finite()) {
            return Err(NeuronError::InvalidConfig(format!(
                "Parameters must be finite, got {params:?}"
            )));
        }
        Ok(Self {
            w1: params.w1,
            w2: params.w2,
            bias: params.bias,
            learning_rate,
        })
    }

    /// Create a neuron with parameters drawn from U(low, high).
    ///
    /// # Errors
    /// - `InvalidConfig` if the range is empty or not finite, or the learning
    ///   rate is invalid
    pub fn random<R: Rng + ?Sized>(
        rng: &mut R,
        low: f64,
        high: f64,
        learning_rate: f64,
    ) -> NeuronResult<Self> {
        validate_init_range(low, high)?;
        validate_learning_rate(learning_rate)?;

        let dist = Uniform::new(low, high);
        Ok(Self {
            w1: dist.sample(rng),
            w2: dist.sample(rng),
            bias: dist.sample(rng),
            learning_rate,
        })
    }

    pub fn w1(&self) -> f64 {
        self.w1
    }

    pub fn w2(&self) -> f64 {
        self.w2
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn params(&self) -> Parameters {
        Parameters {
            w1: self.w1,
            w2: self.w2,
            bias: self.bias,
        }
    }

    /// Pre-activation `z = w1·x1 + w2·x2 + b`.
    pub fn weighted_sum(&self, x1: f64, x2: f64) -> f64 {
        self.w1 * x1 + self.w2 * x2 + self.bias
    }

    /// Output of the unit for one input pair, in (0, 1).
    pub fn predict(&self, x1: f64, x2: f64) -> f64 {
        sigmoid(self.weighted_sum(x1, x2))
    }

    /// Apply one delta-rule update toward `target`.
    ///
    /// # Returns
    /// Squared error of the prediction made *before* the update.
    pub fn learn(&mut self, x1: f64, x2: f64, target: f64) -> f64 {
        let prediction = self.predict(x1, x2);
        let error = target - prediction;
        let delta = error * prediction * (1.0 - prediction);

        let step = self.learning_rate * delta;
        self.w1 += step * x1;
        self.w2 += step * x2;
        self.bias += step;

        error * error
    }
}

pub(crate) fn validate_learning_rate(learning_rate: f64) -> NeuronResult<()> {
    if learning_rate.is_finite() && learning_rate > 0.0 {
        Ok(())
    } else {
        Err(NeuronError::InvalidConfig(format!(
            "Learning rate must be finite and > 0, got {learning_rate}"
        )))
    }
}

pub(crate) fn validate_init_range(low: f64, high: f64) -> NeuronResult<()> {
    if low.is_finite() && high.is_finite() && low < high {
        Ok(())
    } else {
        Err(NeuronError::InvalidConfig(format!(
            "Init range must satisfy low < high, got [{low}, {high})"
        )))
    }
}
