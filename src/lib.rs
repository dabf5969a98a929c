//! # Neuron
//!
//! A single sigmoid neuron trained online, one sample at a time, with a
//! controller that runs epochs until the loss target or an epoch cap is hit.
//!
//! ## Overview
//!
//! The unit computes `σ(w1·x1 + w2·x2 + b)` and learns with the delta rule.
//! The default training stream is ten samples whose target declines linearly
//! from 1 to 0, so convergence is easy to watch.
//!
//! ## Structure
//!
//! - [`core`] — The neuron, stable sigmoid, error type
//! - [`data`] — Validated training streams
//! - [`training`] — Epoch loop, auto-training, reset, batch demo
//! - [`observe`] — Observer hooks: pacing and JSONL metrics
//!
//! ## Example
//!
//! ```
//! use neuron::{Config, Dataset, Trainer};
//!
//! let config = Config { seed: Some(42), ..Config::default() };
//! let mut trainer = Trainer::new(config, Dataset::declining_sequence()).unwrap();
//! let report = trainer.auto_train(&mut ()).unwrap();
//! assert!(report.epochs_run <= 500);
//! ```

pub mod core;
pub mod data;
pub mod observe;
pub mod training;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use crate::core::{sigmoid, NeuronError, NeuronResult, Parameters, SigmoidNeuron};
pub use data::{Dataset, TrainingSample};
pub use observe::{JsonlRecorder, Pacer, TrainingObserver};
pub use training::{
    run_batch_demo, train_epoch, AutoTrainReport, AutoTrainSwitch, DemoConfig, DemoReport,
    EpochOutcome, EpochResult, LossHistory, Pace, Phase, PredictionPoint, SampleEvent,
    SampleOrder, StopReason, Trainer, TrainingSnapshot, TrainingState,
};

/// Training configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// learning_rate = 0.8
/// target_loss = 0.01
/// order = "shuffled"
/// seed = 7
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Step size of the delta rule
    pub learning_rate: f64,
    /// Lower bound of the initial parameter draw (inclusive)
    pub init_low: f64,
    /// Upper bound of the initial parameter draw (exclusive)
    pub init_high: f64,
    /// Auto-training stops when the epoch counter reaches this
    pub max_auto_epochs: usize,
    /// Auto-training stops once the last epoch loss is at or below this
    pub target_loss: f64,
    /// Number of epoch losses kept in the history
    pub history_cap: usize,
    /// Sample visiting order within an epoch
    pub order: SampleOrder,
    /// Seed for initialization, shuffling and placeholders; `None` uses entropy
    pub seed: Option<u64>,
    /// Pause after each sample of a manual epoch (milliseconds)
    pub manual_delay_ms: u64,
    /// Pause after each sample of an automated epoch (milliseconds)
    pub auto_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            learning_rate: crate::core::DEFAULT_LEARNING_RATE,
            init_low: -2.5,
            init_high: 2.5,
            max_auto_epochs: training::MAX_AUTO_EPOCHS,
            target_loss: training::TARGET_AVG_EPOCH_LOSS,
            history_cap: training::LOSS_HISTORY_CAP,
            order: SampleOrder::Sequential,
            seed: None,
            manual_delay_ms: 150,
            auto_delay_ms: 10,
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    /// - `ConfigParse` on malformed TOML or unknown value types
    /// - `InvalidConfig` if a value is out of range
    pub fn from_toml_str(text: &str) -> NeuronResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> NeuronResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    /// - `InvalidConfig` naming the first offending field
    pub fn validate(&self) -> NeuronResult<()> {
        crate::core::validate_learning_rate(self.learning_rate)?;
        crate::core::validate_init_range(self.init_low, self.init_high)?;
        if !(self.target_loss.is_finite() && self.target_loss >= 0.0) {
            return Err(NeuronError::InvalidConfig(format!(
                "target_loss must be finite and >= 0, got {}",
                self.target_loss
            )));
        }
        if self.history_cap == 0 {
            return Err(NeuronError::InvalidConfig(
                "history_cap must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_auto_epochs, 500);
        assert_eq!(config.history_cap, 20);
        assert_eq!(config.target_loss, 0.005);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            learning_rate = 0.8
            order = "shuffled"
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.learning_rate, 0.8);
        assert_eq!(config.order, SampleOrder::Shuffled);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_auto_epochs, 500);
        assert_eq!(config.init_low, -2.5);
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(matches!(
            Config::from_toml_str("learning_rate = -1.0"),
            Err(NeuronError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml_str("history_cap = 0"),
            Err(NeuronError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml_str("init_low = 3.0"),
            Err(NeuronError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml_str("order = 42"),
            Err(NeuronError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/neuron.toml"),
            Err(NeuronError::Io(_))
        ));
    }
}
