//! Integration tests for online training of the sigmoid neuron.
//!
//! These tests verify end-to-end training behavior:
//! - Loss decreases over epochs on the declining sequence
//! - Auto-training terminates and never overshoots its stop conditions
//! - Cancellation and reset leave the session in a consistent state
//! - The batch demo learns the OR function

use std::ops::ControlFlow;

use approx::assert_abs_diff_eq;
use neuron::{
    run_batch_demo, AutoTrainSwitch, Config, Dataset, DemoConfig, EpochResult, NeuronError,
    Parameters, Phase, SampleEvent, SigmoidNeuron, StopReason, Trainer, TrainingObserver,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn seeded_trainer(config: Config, seed: u64) -> Trainer {
    Trainer::with_rng(
        config,
        Dataset::declining_sequence(),
        StdRng::seed_from_u64(seed),
    )
    .expect("Failed to create trainer")
}

/// Collects every committed epoch.
#[derive(Default)]
struct EpochLog {
    epochs: Vec<EpochResult>,
}

impl TrainingObserver for EpochLog {
    fn on_epoch(&mut self, result: &EpochResult) {
        self.epochs.push(result.clone());
    }
}

/// Turns the auto-train switch off partway through a given epoch.
struct CancelDuring {
    switch: AutoTrainSwitch,
    epoch: usize,
    after_samples: usize,
    committed: Vec<Parameters>,
}

impl TrainingObserver for CancelDuring {
    fn on_sample(&mut self, event: &SampleEvent) -> ControlFlow<()> {
        if event.epoch == self.epoch && event.index + 1 == self.after_samples {
            self.switch.disable();
        }
        ControlFlow::Continue(())
    }

    fn on_epoch(&mut self, result: &EpochResult) {
        self.committed.push(result.params);
    }
}

/// Loss should fall substantially over many manual epochs from a neutral start.
#[test]
fn test_loss_decreases_on_declining_sequence() {
    let neuron = SigmoidNeuron::new(Parameters::ZERO, 0.5).expect("neuron");
    let mut trainer = Trainer::with_neuron(
        Config::default(),
        Dataset::declining_sequence(),
        neuron,
        StdRng::seed_from_u64(1),
    )
    .expect("trainer");

    let mut log = EpochLog::default();
    for _ in 0..200 {
        trainer.step(&mut log).expect("step");
    }

    let first = log.epochs.first().expect("first epoch").avg_loss;
    let last = log.epochs.last().expect("last epoch").avg_loss;
    println!("Initial loss: {first:.6}, final loss: {last:.6}");

    assert!(last < first, "loss should decrease (first {first}, last {last})");
    // A decreasing weight on x1 is what fits a declining target
    assert!(trainer.params().w1 < 0.0);
}

/// The auto-train loop stops on exactly the epoch that manual stepping would
/// first reach the loss target, or at the cap.
#[test]
fn test_auto_train_matches_manual_stopping_point() {
    let config = Config {
        target_loss: 0.05,
        ..Config::default()
    };

    let mut manual = seeded_trainer(config.clone(), 42);
    while manual.epoch() < config.max_auto_epochs
        && manual.last_loss().unwrap_or(f64::INFINITY) > config.target_loss
    {
        manual.step(&mut ()).expect("step");
    }

    let mut auto = seeded_trainer(config.clone(), 42);
    let mut log = EpochLog::default();
    let report = auto.auto_train(&mut log).expect("auto train");

    assert_eq!(report.epochs_run, manual.epoch());
    assert_eq!(auto.epoch(), manual.epoch());
    assert_eq!(auto.params(), manual.params());

    // No epoch before the last one met the target
    let (last, earlier) = log.epochs.split_last().expect("at least one epoch");
    assert!(earlier.iter().all(|e| e.avg_loss > config.target_loss));
    match report.stop {
        StopReason::Converged => assert!(last.avg_loss <= config.target_loss),
        StopReason::EpochLimit => assert_eq!(auto.epoch(), config.max_auto_epochs),
        StopReason::Cancelled => panic!("nothing cancelled this run"),
    }
}

/// Auto-training always terminates within the epoch cap.
#[test]
fn test_auto_train_terminates_within_cap() {
    for seed in 0..5 {
        let mut trainer = seeded_trainer(Config::default(), seed);
        let report = trainer.auto_train(&mut ()).expect("auto train");
        assert!(report.epochs_run <= 500);
        assert!(trainer.epoch() <= 500);
        assert!(trainer.loss_history().len() <= 20);
        if report.stop == StopReason::Converged {
            assert!(report.last_loss.expect("loss") <= 0.005);
        } else {
            assert_eq!(report.stop, StopReason::EpochLimit);
            assert_eq!(trainer.epoch(), 500);
        }
    }
}

/// Switching auto-training off mid-epoch discards that epoch; restarting
/// continues from the last committed state.
#[test]
fn test_cancel_mid_epoch_then_restart() {
    let config = Config {
        target_loss: 0.0,
        max_auto_epochs: 10,
        ..Config::default()
    };
    let mut trainer = seeded_trainer(config, 7);
    let mut observer = CancelDuring {
        switch: trainer.auto_switch(),
        epoch: 3,
        after_samples: 4,
        committed: Vec::new(),
    };

    let report = trainer.auto_train(&mut observer).expect("auto train");
    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.epochs_run, 2);
    assert_eq!(trainer.epoch(), 2);
    assert_eq!(trainer.loss_history().len(), 2);
    assert_eq!(trainer.params(), observer.committed[1]);
    assert_eq!(trainer.phase(), Phase::Idle);
    assert!(!trainer.auto_switch().is_enabled());

    // Restart: the observer's trigger epoch is already behind us
    observer.epoch = 0;
    let report = trainer.auto_train(&mut observer).expect("restart");
    assert_eq!(report.stop, StopReason::EpochLimit);
    assert_eq!(trainer.epoch(), 10);
    assert_eq!(report.epochs_run, 8);
}

/// Reset is refused while auto-training is switched on.
#[test]
fn test_reset_requires_idle() {
    let mut trainer = seeded_trainer(Config::default(), 3);
    trainer.step(&mut ()).expect("step");

    let switch = trainer.auto_switch();
    switch.enable();
    match trainer.reset() {
        Err(NeuronError::Busy(phase)) => assert_eq!(phase, Phase::AutoTraining),
        other => panic!("expected Busy, got {other:?}"),
    }
    assert_eq!(trainer.epoch(), 1);

    switch.disable();
    trainer.reset().expect("reset");
    assert_eq!(trainer.epoch(), 0);
    assert!(trainer.loss_history().is_empty());
}

/// Same seed, same session.
#[test]
fn test_seeded_runs_are_reproducible() {
    let config = Config {
        seed: Some(99),
        ..Config::default()
    };
    let mut a = Trainer::new(config.clone(), Dataset::declining_sequence()).expect("a");
    let mut b = Trainer::new(config, Dataset::declining_sequence()).expect("b");

    assert_eq!(a.snapshot(), b.snapshot());
    for _ in 0..5 {
        a.step(&mut ()).expect("step a");
        b.step(&mut ()).expect("step b");
    }
    a.reset().expect("reset a");
    b.reset().expect("reset b");
    assert_eq!(a.snapshot(), b.snapshot());
}

/// The snapshot serializes for an external plotter.
#[test]
fn test_snapshot_serializes() {
    let mut trainer = seeded_trainer(Config::default(), 5);
    trainer.step(&mut ()).expect("step");

    let json = serde_json::to_value(trainer.snapshot()).expect("serialize");
    assert_eq!(json["phase"], "idle");
    assert_eq!(json["epoch"], 1);
    assert_eq!(json["loss_history"].as_array().expect("array").len(), 1);
    assert_eq!(json["predictions"].as_array().expect("array").len(), 10);
    assert_abs_diff_eq!(
        json["last_loss"].as_f64().expect("loss"),
        trainer.last_loss().expect("loss"),
        epsilon = 1e-12
    );
}

/// The shuffled batch demo learns OR from a neutral start.
#[test]
fn test_batch_demo_learns_or() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut neuron = SigmoidNeuron::new(Parameters::ZERO, 0.5).expect("neuron");
    let dataset = Dataset::or_gate();

    let report = run_batch_demo(&mut neuron, &dataset, &DemoConfig::default(), &mut rng);

    assert_eq!(report.reports.len(), 10);
    let first = report.reports[0].avg_loss;
    let last = report.final_loss.expect("final loss");
    assert!(last < first);

    for s in dataset.iter() {
        let prediction = neuron.predict(s.x1, s.x2);
        let class = if prediction > 0.5 { 1.0 } else { 0.0 };
        assert_abs_diff_eq!(class, s.target);
    }
}
