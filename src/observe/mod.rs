//! Observation hooks between the trainer and whatever displays it.
//!
//! The trainer never sleeps and never writes output itself. Everything the
//! presentation layer needs arrives through [`TrainingObserver`]:
//! - [`Pacer`] slows training down to a watchable speed
//! - [`JsonlRecorder`] writes one JSON event per line for dashboards
//!
//! Observers compose by wrapping: `Pacer::new(JsonlRecorder::new(file), ..)`.

use std::io::{self, Write};
use std::ops::ControlFlow;
use std::time::Duration;

use log::warn;

use crate::training::{AutoTrainSwitch, EpochResult, Pace, SampleEvent, TrainingState};
use crate::Config;

/// Callbacks invoked by the trainer.
///
/// All methods default to no-ops, so implementors only override what they use.
pub trait TrainingObserver {
    /// Called after every sample update. Returning `Break` cancels the epoch
    /// before it commits.
    fn on_sample(&mut self, _event: &SampleEvent) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called once an epoch has committed.
    fn on_epoch(&mut self, _result: &EpochResult) {}

    /// Called after [`Trainer::reset_with`](crate::Trainer::reset_with).
    fn on_reset(&mut self, _state: &TrainingState) {}
}

impl TrainingObserver for () {}

impl<O: TrainingObserver + ?Sized> TrainingObserver for &mut O {
    fn on_sample(&mut self, event: &SampleEvent) -> ControlFlow<()> {
        (**self).on_sample(event)
    }

    fn on_epoch(&mut self, result: &EpochResult) {
        (**self).on_epoch(result);
    }

    fn on_reset(&mut self, state: &TrainingState) {
        (**self).on_reset(state);
    }
}

impl<O: TrainingObserver> TrainingObserver for Option<O> {
    fn on_sample(&mut self, event: &SampleEvent) -> ControlFlow<()> {
        match self {
            Some(inner) => inner.on_sample(event),
            None => ControlFlow::Continue(()),
        }
    }

    fn on_epoch(&mut self, result: &EpochResult) {
        if let Some(inner) = self {
            inner.on_epoch(result);
        }
    }

    fn on_reset(&mut self, state: &TrainingState) {
        if let Some(inner) = self {
            inner.on_reset(state);
        }
    }
}

/// Delays training after every sample.
///
/// Automated delays wait on the [`AutoTrainSwitch`], so turning the switch off
/// wakes the pacer at once and the trainer cancels the epoch at its next
/// check. Manual delays are plain sleeps.
#[derive(Debug)]
pub struct Pacer<O> {
    inner: O,
    switch: AutoTrainSwitch,
    manual_delay: Duration,
    auto_delay: Duration,
}

impl<O> Pacer<O> {
    pub fn new(inner: O, switch: AutoTrainSwitch, manual_delay: Duration, auto_delay: Duration) -> Self {
        Self {
            inner,
            switch,
            manual_delay,
            auto_delay,
        }
    }

    /// Pacer with the delays from `config`.
    pub fn from_config(inner: O, switch: AutoTrainSwitch, config: &Config) -> Self {
        Self::new(
            inner,
            switch,
            Duration::from_millis(config.manual_delay_ms),
            Duration::from_millis(config.auto_delay_ms),
        )
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: TrainingObserver> TrainingObserver for Pacer<O> {
    fn on_sample(&mut self, event: &SampleEvent) -> ControlFlow<()> {
        if self.inner.on_sample(event).is_break() {
            return ControlFlow::Break(());
        }
        match event.pace {
            Pace::Automated => {
                self.switch.wait_while_enabled(self.auto_delay);
            }
            Pace::Manual => std::thread::sleep(self.manual_delay),
        }
        ControlFlow::Continue(())
    }

    fn on_epoch(&mut self, result: &EpochResult) {
        self.inner.on_epoch(result);
    }

    fn on_reset(&mut self, state: &TrainingState) {
        self.inner.on_reset(state);
    }
}

/// Writes epoch and reset events as JSON lines.
///
/// Write failures are logged once and then latched; later events are dropped
/// and the error is returned from [`finish`](Self::finish).
#[derive(Debug)]
pub struct JsonlRecorder<W: Write> {
    writer: W,
    error: Option<io::Error>,
}

impl<W: Write> JsonlRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
        }
    }

    /// Flush and hand back the writer, or the first write error.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_event(&mut self, event: &serde_json::Value) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.writer, "{event}") {
            warn!("Failed to write metrics event: {e}");
            self.error = Some(e);
        }
    }
}

impl<W: Write> TrainingObserver for JsonlRecorder<W> {
    fn on_epoch(&mut self, result: &EpochResult) {
        let event = serde_json::json!({
            "type": "epoch",
            "epoch": result.epoch,
            "avg_loss": result.avg_loss,
            "w1": result.params.w1,
            "w2": result.params.w2,
            "bias": result.params.bias,
            "predictions": result.predictions,
        });
        self.write_event(&event);
    }

    fn on_reset(&mut self, state: &TrainingState) {
        let params = state.params();
        let event = serde_json::json!({
            "type": "reset",
            "w1": params.w1,
            "w2": params.w2,
            "bias": params.bias,
            "predictions": state.predictions(),
        });
        self.write_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dataset, Trainer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Instant;

    fn trainer(config: Config) -> Trainer {
        Trainer::with_rng(config, Dataset::declining_sequence(), StdRng::seed_from_u64(21))
            .expect("create trainer")
    }

    #[test]
    fn test_recorder_writes_epoch_lines() {
        let mut t = trainer(Config::default());
        let mut recorder = JsonlRecorder::new(Vec::new());
        t.step(&mut recorder).unwrap();
        t.step(&mut recorder).unwrap();
        t.reset_with(&mut recorder).unwrap();

        let bytes = recorder.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "epoch");
        assert_eq!(lines[0]["epoch"], 1);
        assert_eq!(lines[1]["epoch"], 2);
        assert_eq!(lines[1]["predictions"].as_array().unwrap().len(), 10);
        assert_eq!(lines[2]["type"], "reset");
    }

    #[test]
    fn test_pacer_forwards_break() {
        struct StopAt(usize);
        impl TrainingObserver for StopAt {
            fn on_sample(&mut self, event: &SampleEvent) -> ControlFlow<()> {
                if event.index == self.0 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        }

        let mut t = trainer(Config::default());
        let mut paced = Pacer::new(
            Some(StopAt(3)),
            t.auto_switch(),
            Duration::ZERO,
            Duration::ZERO,
        );
        let outcome = t.step(&mut paced).unwrap();
        assert!(!outcome.is_completed());
        assert_eq!(t.epoch(), 0);
    }

    #[test]
    fn test_paced_auto_train_runs() {
        let config = Config {
            max_auto_epochs: 3,
            target_loss: 0.0,
            auto_delay_ms: 1,
            ..Config::default()
        };
        let mut t = trainer(config);
        let mut paced = Pacer::from_config(JsonlRecorder::new(Vec::new()), t.auto_switch(), t.config());
        let report = t.auto_train(&mut paced).unwrap();
        assert_eq!(report.epochs_run, 3);

        let text = String::from_utf8(paced.into_inner().finish().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_pacer_wakes_on_cancel() {
        let config = Config {
            auto_delay_ms: 60_000,
            ..Config::default()
        };
        let mut t = trainer(config);
        let switch = t.auto_switch();
        let mut paced = Pacer::from_config((), switch.clone(), t.config());

        let canceller = std::thread::spawn(move || {
            while !switch.is_enabled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(20));
            switch.disable();
        });

        let started = Instant::now();
        let report = t.auto_train(&mut paced).unwrap();
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(report.stop, crate::StopReason::Cancelled);
        assert_eq!(report.epochs_run, 0);
        assert_eq!(t.epoch(), 0);
    }
}
