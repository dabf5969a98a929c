//! Training loops, convergence checks, and session state.
//!
//! This module drives a [`SigmoidNeuron`] through a [`Dataset`]:
//!
//! 1. **Manual stepping** ([`Trainer::step`]) runs exactly one epoch
//! 2. **Auto-training** ([`Trainer::auto_train`]) repeats epochs until the
//!    loss target is met, the epoch cap is reached, or the run is cancelled
//! 3. **Batch demo** ([`run_batch_demo`]) trains a bare neuron for a fixed
//!    number of shuffled epochs, with no controller state at all
//!
//! ## Epoch Commit
//!
//! An epoch runs on a scratch copy of the neuron. Only a pass that visits
//! every sample commits: parameters, epoch counter, loss history and
//! prediction points all change together or not at all.
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. Automated epochs check the shared
//! [`AutoTrainSwitch`] before every sample, and any observer may return
//! [`ControlFlow::Break`](std::ops::ControlFlow::Break) from [`TrainingObserver::on_sample`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use ndarray::Array1;
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::{NeuronError, NeuronResult, Parameters, SigmoidNeuron};
use crate::data::{Dataset, TrainingSample};
use crate::observe::TrainingObserver;
use crate::Config;

/// Maximum number of epoch losses kept in the history.
pub const LOSS_HISTORY_CAP: usize = 20;

/// Auto-training never runs past this epoch count.
pub const MAX_AUTO_EPOCHS: usize = 500;

/// Auto-training stops once the average epoch loss is at or below this value.
pub const TARGET_AVG_EPOCH_LOSS: f64 = 0.005;

// ============================================================================
// Session state
// ============================================================================

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    ManualStepping,
    AutoTraining,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::ManualStepping => write!(f, "manual stepping"),
            Phase::AutoTraining => write!(f, "auto-training"),
        }
    }
}

/// How an epoch was triggered; decides pacing and switch checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pace {
    Manual,
    Automated,
}

/// Order in which an epoch visits the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrder {
    /// Stream order, every epoch
    #[default]
    Sequential,
    /// Fresh random permutation per epoch
    Shuffled,
}

/// A prediction made for the sample at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub index: usize,
    pub value: f64,
}

/// Bounded FIFO of average epoch losses, most recent last.
#[derive(Debug, Clone, PartialEq)]
pub struct LossHistory {
    losses: VecDeque<f64>,
    cap: usize,
}

impl LossHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            losses: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append a loss, evicting and returning the oldest one when full.
    pub fn push(&mut self, loss: f64) -> Option<f64> {
        self.losses.push_back(loss);
        if self.losses.len() > self.cap {
            self.losses.pop_front()
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.losses.back().copied()
    }

    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.losses.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.losses.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.losses.clear();
    }
}

/// Everything the presentation layer reads between epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    params: Parameters,
    epoch: usize,
    loss_history: LossHistory,
    predictions: Vec<PredictionPoint>,
}

impl TrainingState {
    fn fresh(params: Parameters, history_cap: usize, predictions: Vec<PredictionPoint>) -> Self {
        Self {
            params,
            epoch: 0,
            loss_history: LossHistory::new(history_cap),
            predictions,
        }
    }

    pub fn params(&self) -> Parameters {
        self.params
    }

    /// Number of completed epochs since the last reset.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn loss_history(&self) -> &LossHistory {
        &self.loss_history
    }

    /// Average loss of the most recent epoch, `None` before the first one.
    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.latest()
    }

    /// Prediction points of the last epoch in sample-index order, or placeholders after a reset.
    pub fn predictions(&self) -> &[PredictionPoint] {
        &self.predictions
    }
}

/// Serializable copy of the controller's observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub phase: Phase,
    pub epoch: usize,
    pub params: Parameters,
    pub last_loss: Option<f64>,
    pub loss_history: Vec<f64>,
    pub predictions: Vec<PredictionPoint>,
}

// ============================================================================
// Epoch results and events
// ============================================================================

/// Result of one committed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochResult {
    /// Epoch counter after this epoch committed (1-based)
    pub epoch: usize,
    /// Mean squared error over the pass
    pub avg_loss: f64,
    /// `(index, prediction)` pairs in visit order, predictions taken before each update
    pub predictions: Vec<PredictionPoint>,
    /// Parameters after the pass
    pub params: Parameters,
}

/// Outcome of running one epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum EpochOutcome {
    Completed(EpochResult),
    /// Aborted before commit; session state is untouched
    Cancelled { completed_samples: usize },
}

impl EpochOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, EpochOutcome::Completed(_))
    }

    pub fn result(&self) -> Option<&EpochResult> {
        match self {
            EpochOutcome::Completed(result) => Some(result),
            EpochOutcome::Cancelled { .. } => None,
        }
    }
}

/// Emitted after every sample update inside an epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEvent {
    /// Epoch being run (1-based)
    pub epoch: usize,
    pub index: usize,
    pub sample: TrainingSample,
    /// Prediction before the update
    pub prediction: f64,
    pub squared_error: f64,
    /// In-flight parameters after the update; not yet committed
    pub params: Parameters,
    pub pace: Pace,
}

/// Why an auto-training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Last epoch loss at or below the target
    Converged,
    /// Epoch counter reached the cap
    EpochLimit,
    /// Switch turned off or an observer broke out
    Cancelled,
}

/// Summary of one [`Trainer::auto_train`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTrainReport {
    pub epochs_run: usize,
    pub stop: StopReason,
    pub last_loss: Option<f64>,
}

// ============================================================================
// Auto-train switch
// ============================================================================

/// Shared on/off flag for auto-training.
///
/// Clones share the same flag. Turning it off cancels a running auto-train
/// loop at its next sample and wakes any thread blocked in
/// [`wait_while_enabled`](Self::wait_while_enabled).
#[derive(Debug, Clone, Default)]
pub struct AutoTrainSwitch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl AutoTrainSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, enabled: bool) {
        *self.lock() = enabled;
        self.inner.1.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        *self.lock()
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        let mut enabled = self.lock();
        *enabled = !*enabled;
        let now = *enabled;
        drop(enabled);
        self.inner.1.notify_all();
        now
    }

    /// Block for up to `timeout`, returning early if the switch turns off.
    ///
    /// # Returns
    /// Whether the switch is still enabled.
    pub fn wait_while_enabled(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |enabled| *enabled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Owns the neuron, the training stream and the session state.
///
/// Every mutating operation takes `&mut self`, so at most one epoch runs at a
/// time. Observers see in-flight progress through [`TrainingObserver`];
/// everything else reads the committed [`TrainingState`].
#[derive(Debug)]
pub struct Trainer<R: Rng = StdRng> {
    config: Config,
    dataset: Dataset,
    neuron: SigmoidNeuron,
    state: TrainingState,
    phase: Phase,
    switch: AutoTrainSwitch,
    rng: R,
}

impl Trainer<StdRng> {
    /// Create a trainer seeded from `config.seed`, or from OS entropy.
    ///
    /// # Errors
    /// - `InvalidConfig` if the configuration does not validate
    pub fn new(config: Config, dataset: Dataset) -> NeuronResult<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, dataset, rng)
    }
}

impl<R: Rng> Trainer<R> {
    /// Create a trainer with a randomly initialized neuron drawn from `rng`.
    pub fn with_rng(config: Config, dataset: Dataset, mut rng: R) -> NeuronResult<Self> {
        config.validate()?;
        let neuron = SigmoidNeuron::random(
            &mut rng,
            config.init_low,
            config.init_high,
            config.learning_rate,
        )?;
        Self::with_neuron(config, dataset, neuron, rng)
    }

    /// Create a trainer around an existing neuron.
    ///
    /// The neuron keeps its own learning rate, also across resets; `rng` is still used for
    /// placeholder predictions, shuffling and later resets.
    pub fn with_neuron(
        config: Config,
        dataset: Dataset,
        neuron: SigmoidNeuron,
        mut rng: R,
    ) -> NeuronResult<Self> {
        config.validate()?;
        let predictions = placeholder_predictions(dataset.len(), &mut rng);
        let state = TrainingState::fresh(neuron.params(), config.history_cap, predictions);
        Ok(Self {
            config,
            dataset,
            neuron,
            state,
            phase: Phase::Idle,
            switch: AutoTrainSwitch::new(),
            rng,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn neuron(&self) -> &SigmoidNeuron {
        &self.neuron
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn params(&self) -> Parameters {
        self.state.params()
    }

    pub fn epoch(&self) -> usize {
        self.state.epoch()
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.state.last_loss()
    }

    pub fn loss_history(&self) -> &LossHistory {
        self.state.loss_history()
    }

    pub fn predictions(&self) -> &[PredictionPoint] {
        self.state.predictions()
    }

    /// Handle to the auto-train flag, for cancelling from elsewhere.
    pub fn auto_switch(&self) -> AutoTrainSwitch {
        self.switch.clone()
    }

    /// Flip the auto-train flag and return its new value.
    pub fn toggle_auto_train(&self) -> bool {
        self.switch.toggle()
    }

    pub fn snapshot(&self) -> TrainingSnapshot {
        TrainingSnapshot {
            phase: self.phase,
            epoch: self.state.epoch,
            params: self.state.params,
            last_loss: self.state.last_loss(),
            loss_history: self.state.loss_history.to_vec(),
            predictions: self.state.predictions.clone(),
        }
    }

    /// Run one manual epoch.
    ///
    /// # Errors
    /// - `Busy` unless the trainer is idle with auto-training switched off
    pub fn step<O>(&mut self, observer: &mut O) -> NeuronResult<EpochOutcome>
    where
        O: TrainingObserver + ?Sized,
    {
        self.ensure_available()?;
        self.phase = Phase::ManualStepping;
        let outcome = self.run_epoch(Pace::Manual, observer);
        self.phase = Phase::Idle;
        Ok(outcome)
    }

    /// Repeat automated epochs until converged, capped, or cancelled.
    ///
    /// # Algorithm
    /// ```text
    /// switch on
    /// while switch on && epoch < max_auto_epochs && last_loss (or +inf) > target_loss:
    ///     run_epoch(Automated)
    /// switch off
    /// ```
    ///
    /// Calling it again re-evaluates every stop condition from the current
    /// state, so a cancelled run can simply be restarted.
    ///
    /// # Errors
    /// - `Busy` if another run is in progress
    pub fn auto_train<O>(&mut self, observer: &mut O) -> NeuronResult<AutoTrainReport>
    where
        O: TrainingObserver + ?Sized,
    {
        if self.phase != Phase::Idle {
            return Err(NeuronError::Busy(self.phase));
        }

        self.switch.enable();
        self.phase = Phase::AutoTraining;
        let start_epoch = self.state.epoch;
        info!(
            "Auto-training from epoch {} (max {}, target loss {})",
            start_epoch, self.config.max_auto_epochs, self.config.target_loss
        );

        let stop = loop {
            if !self.switch.is_enabled() {
                break StopReason::Cancelled;
            }
            if self.state.last_loss().unwrap_or(f64::INFINITY) <= self.config.target_loss {
                break StopReason::Converged;
            }
            if self.state.epoch >= self.config.max_auto_epochs {
                break StopReason::EpochLimit;
            }
            if !self.run_epoch(Pace::Automated, observer).is_completed() {
                break StopReason::Cancelled;
            }
        };

        self.switch.disable();
        self.phase = Phase::Idle;

        let report = AutoTrainReport {
            epochs_run: self.state.epoch - start_epoch,
            stop,
            last_loss: self.state.last_loss(),
        };
        info!(
            "Auto-training stopped ({:?}) after {} epochs at epoch {}, loss {:?}",
            report.stop, report.epochs_run, self.state.epoch, report.last_loss
        );
        Ok(report)
    }

    /// Reinitialize the neuron and clear the session.
    ///
    /// Prediction points are refilled with uniform placeholders in [0, 1)
    /// rather than emptied, so a plot always has one point per sample.
    ///
    /// # Errors
    /// - `Busy` unless the trainer is idle with auto-training switched off
    pub fn reset(&mut self) -> NeuronResult<()> {
        self.reset_with(&mut ())
    }

    /// [`reset`](Self::reset), then report the fresh state to `observer`.
    pub fn reset_with<O>(&mut self, observer: &mut O) -> NeuronResult<()>
    where
        O: TrainingObserver + ?Sized,
    {
        self.ensure_available()?;

        self.neuron = SigmoidNeuron::random(
            &mut self.rng,
            self.config.init_low,
            self.config.init_high,
            self.neuron.learning_rate(),
        )?;
        let predictions = placeholder_predictions(self.dataset.len(), &mut self.rng);
        self.state = TrainingState::fresh(self.neuron.params(), self.config.history_cap, predictions);

        info!("Reset neuron to {:?}", self.state.params);
        observer.on_reset(&self.state);
        Ok(())
    }

    fn ensure_available(&self) -> NeuronResult<()> {
        if self.phase != Phase::Idle {
            return Err(NeuronError::Busy(self.phase));
        }
        if self.switch.is_enabled() {
            return Err(NeuronError::Busy(Phase::AutoTraining));
        }
        Ok(())
    }

    /// One pass over the dataset on a scratch neuron, committed only if complete.
    #[allow(clippy::cast_precision_loss)]
    fn run_epoch<O>(&mut self, pace: Pace, observer: &mut O) -> EpochOutcome
    where
        O: TrainingObserver + ?Sized,
    {
        let mut visits: Vec<(usize, TrainingSample)> = self.dataset.iter().enumerate().collect();
        if self.config.order == SampleOrder::Shuffled {
            visits.shuffle(&mut self.rng);
        }

        let epoch = self.state.epoch + 1;
        let mut scratch = self.neuron.clone();
        let mut squared_error_sum = 0.0;
        let mut predictions = Vec::with_capacity(visits.len());

        for (completed, &(index, sample)) in visits.iter().enumerate() {
            if pace == Pace::Automated && !self.switch.is_enabled() {
                return cancelled(epoch, completed);
            }

            let prediction = scratch.predict(sample.x1, sample.x2);
            let squared_error = scratch.learn(sample.x1, sample.x2, sample.target);
            squared_error_sum += squared_error;
            predictions.push(PredictionPoint {
                index,
                value: prediction,
            });

            let event = SampleEvent {
                epoch,
                index,
                sample,
                prediction,
                squared_error,
                params: scratch.params(),
                pace,
            };
            if observer.on_sample(&event).is_break() {
                return cancelled(epoch, completed + 1);
            }
        }

        if pace == Pace::Automated && !self.switch.is_enabled() {
            return cancelled(epoch, visits.len());
        }

        let avg_loss = squared_error_sum / visits.len() as f64;
        self.neuron = scratch;
        self.state.params = self.neuron.params();
        self.state.loss_history.push(avg_loss);
        self.state.epoch = epoch;
        self.state.predictions.clone_from(&predictions);
        self.state.predictions.sort_unstable_by_key(|p| p.index);

        debug!("Epoch {epoch}: avg loss {avg_loss:.6}, params {:?}", self.state.params);

        let result = EpochResult {
            epoch,
            avg_loss,
            predictions,
            params: self.state.params,
        };
        observer.on_epoch(&result);
        EpochOutcome::Completed(result)
    }
}

fn cancelled(epoch: usize, completed_samples: usize) -> EpochOutcome {
    debug!("Epoch {epoch} cancelled after {completed_samples} samples");
    EpochOutcome::Cancelled { completed_samples }
}

/// One uniform [0, 1) placeholder per sample.
fn placeholder_predictions<R: Rng>(n: usize, rng: &mut R) -> Vec<PredictionPoint> {
    let values: Array1<f64> = Array1::random_using(n, Uniform::new(0.0, 1.0), rng);
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| PredictionPoint { index, value })
        .collect()
}

// ============================================================================
// Batch demo
// ============================================================================

/// Train a bare neuron for one epoch without any controller state.
///
/// # Returns
/// Average squared error over the pass.
#[allow(clippy::cast_precision_loss)]
pub fn train_epoch<R: Rng + ?Sized>(
    neuron: &mut SigmoidNeuron,
    dataset: &Dataset,
    order: SampleOrder,
    rng: &mut R,
) -> f64 {
    let mut samples: Vec<TrainingSample> = dataset.iter().collect();
    if order == SampleOrder::Shuffled {
        samples.shuffle(rng);
    }

    let total: f64 = samples
        .iter()
        .map(|s| neuron.learn(s.x1, s.x2, s.target))
        .sum();
    total / samples.len() as f64
}

/// Settings for [`run_batch_demo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Epochs to run; the demo never stops early
    pub epochs: usize,
    /// Record the loss every N epochs (0 = never)
    pub report_every: usize,
    /// Loss below which the run counts as converged
    pub convergence_loss: f64,
    pub order: SampleOrder,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            report_every: 100,
            convergence_loss: 0.001,
            order: SampleOrder::Shuffled,
        }
    }
}

/// Loss recorded at a reporting epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    pub epoch: usize,
    pub avg_loss: f64,
}

/// Outcome of [`run_batch_demo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoReport {
    pub reports: Vec<EpochLoss>,
    /// First epoch after the first whose loss fell below the threshold
    pub converged_at: Option<usize>,
    pub final_loss: Option<f64>,
}

/// Train `neuron` for a fixed number of epochs, recording progress.
pub fn run_batch_demo<R: Rng + ?Sized>(
    neuron: &mut SigmoidNeuron,
    dataset: &Dataset,
    config: &DemoConfig,
    rng: &mut R,
) -> DemoReport {
    let mut reports = Vec::new();
    let mut converged_at = None;
    let mut final_loss = None;

    for epoch in 1..=config.epochs {
        let avg_loss = train_epoch(neuron, dataset, config.order, rng);

        if config.report_every > 0 && epoch % config.report_every == 0 {
            info!(
                "Epoch {epoch}, avg loss {avg_loss:.6}, params {:?}",
                neuron.params()
            );
            reports.push(EpochLoss { epoch, avg_loss });
        }
        if converged_at.is_none() && epoch > 1 && avg_loss < config.convergence_loss {
            info!("Converged at epoch {epoch}");
            converged_at = Some(epoch);
        }
        final_loss = Some(avg_loss);
    }

    DemoReport {
        reports,
        converged_at,
        final_loss,
    }
}

// ============================================================================
// Tests
// ============================================================================
