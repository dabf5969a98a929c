//! Neuron training binary.
//!
//! Drives a single sigmoid neuron from the command line: auto-train until
//! convergence, step through manual epochs, or run the shuffled OR-gate demo.
//! Optionally writes JSONL metrics for an external plotter.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use log::{error, info};
use neuron::core::STANDALONE_INIT_RANGE;
use neuron::{
    run_batch_demo, Config, Dataset, DemoConfig, EpochOutcome, JsonlRecorder, NeuronResult,
    Pacer, SampleOrder, SigmoidNeuron, Trainer,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Parser, Debug)]
#[command(
    name = "neuron-train",
    about = "Train a single sigmoid neuron on a declining target sequence"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Random seed (overrides the config file)
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Repeat epochs until the loss target or the epoch cap is reached
    Auto {
        /// Sleep between samples as configured by the delay settings
        #[arg(long, default_value_t = false)]
        paced: bool,

        /// Cancel auto-training after this many seconds
        #[arg(long)]
        timeout_secs: Option<f64>,

        /// Output metrics file (JSONL, appended)
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Run a fixed number of manual epochs
    Step {
        /// Number of epochs
        #[arg(long, default_value_t = 1)]
        epochs: usize,

        /// Sleep between samples as configured by the delay settings
        #[arg(long, default_value_t = false)]
        paced: bool,
    },

    /// Train a fresh neuron on the OR function with shuffled epochs
    Demo {
        /// Number of epochs
        #[arg(long, default_value_t = 1000)]
        epochs: usize,

        /// Report loss every N epochs
        #[arg(long, default_value_t = 100)]
        report_every: usize,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> NeuronResult<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    match args.command {
        Command::Auto {
            paced,
            timeout_secs,
            metrics_file,
        } => run_auto(config, paced, timeout_secs, metrics_file),
        Command::Step { epochs, paced } => run_steps(config, epochs, paced),
        Command::Demo {
            epochs,
            report_every,
        } => run_demo(&config, epochs, report_every),
    }
}

fn run_auto(
    config: Config,
    paced: bool,
    timeout_secs: Option<f64>,
    metrics_file: Option<PathBuf>,
) -> NeuronResult<()> {
    let mut trainer = Trainer::new(config, Dataset::declining_sequence())?;
    print_header(&trainer);

    let recorder = match &metrics_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            info!("Metrics: {}", path.display());
            Some(JsonlRecorder::new(BufWriter::new(file)))
        }
        None => None,
    };

    if let Some(timeout) = timeout_secs.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
        let switch = trainer.auto_switch();
        std::thread::spawn(move || {
            let started = Instant::now();
            while !switch.is_enabled() && started.elapsed() < timeout {
                std::thread::sleep(Duration::from_millis(1));
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if switch.wait_while_enabled(remaining) {
                info!("Timeout after {timeout:?}, cancelling auto-training");
                switch.disable();
            }
        });
    }

    let started = Instant::now();
    let recorder = if paced {
        let mut observer = Pacer::from_config(recorder, trainer.auto_switch(), trainer.config());
        let report = trainer.auto_train(&mut observer)?;
        print_report(&report, started.elapsed());
        observer.into_inner()
    } else {
        let mut observer = recorder;
        let report = trainer.auto_train(&mut observer)?;
        print_report(&report, started.elapsed());
        observer
    };

    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    print_state(&trainer);
    Ok(())
}

fn run_steps(config: Config, epochs: usize, paced: bool) -> NeuronResult<()> {
    let mut trainer = Trainer::new(config, Dataset::declining_sequence())?;
    print_header(&trainer);

    let mut observer = paced.then(|| Pacer::from_config((), trainer.auto_switch(), trainer.config()));
    for _ in 0..epochs {
        match trainer.step(&mut observer)? {
            EpochOutcome::Completed(result) => println!(
                "Epoch {:3} | loss: {:.5} | w1: {:+.4} w2: {:+.4} bias: {:+.4}",
                result.epoch, result.avg_loss, result.params.w1, result.params.w2, result.params.bias
            ),
            EpochOutcome::Cancelled { completed_samples } => {
                println!("Epoch cancelled after {completed_samples} samples");
            }
        }
    }
    print_state(&trainer);
    Ok(())
}

fn run_demo(config: &Config, epochs: usize, report_every: usize) -> NeuronResult<()> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (low, high) = STANDALONE_INIT_RANGE;
    let mut neuron = SigmoidNeuron::random(&mut rng, low, high, config.learning_rate)?;
    let dataset = Dataset::or_gate();
    let demo = DemoConfig {
        epochs,
        report_every,
        order: SampleOrder::Shuffled,
        ..DemoConfig::default()
    };

    let p = neuron.params();
    println!("Initial state: w1={:.4}, w2={:.4}, bias={:.4}", p.w1, p.w2, p.bias);

    let report = run_batch_demo(&mut neuron, &dataset, &demo, &mut rng);
    for r in &report.reports {
        println!("Epoch {:5} | avg loss: {:.6}", r.epoch, r.avg_loss);
    }
    match report.converged_at {
        Some(epoch) => println!("Converged at epoch {epoch}"),
        None => println!("Did not converge below {}", demo.convergence_loss),
    }

    let p = neuron.params();
    println!("Final state: w1={:.4}, w2={:.4}, bias={:.4}", p.w1, p.w2, p.bias);
    for s in dataset.iter() {
        let prediction = neuron.predict(s.x1, s.x2);
        println!(
            "  Input: ({:.1}, {:.1}) -> Target: {:.1}, Prediction: {:.4}",
            s.x1, s.x2, s.target, prediction
        );
    }
    Ok(())
}

fn print_header(trainer: &Trainer) {
    let config = trainer.config();
    let p = trainer.params();
    info!("Neuron training");
    info!("  Samples: {}", trainer.dataset().len());
    info!(
        "  Learning rate: {}, order: {:?}",
        config.learning_rate, config.order
    );
    info!(
        "  Stop: loss <= {} or epoch {}",
        config.target_loss, config.max_auto_epochs
    );
    info!("  Initial: w1={:.4}, w2={:.4}, bias={:.4}", p.w1, p.w2, p.bias);
}

fn print_report(report: &neuron::AutoTrainReport, elapsed: Duration) {
    println!(
        "Stopped: {:?} after {} epochs in {:.2}s",
        report.stop,
        report.epochs_run,
        elapsed.as_secs_f32()
    );
}

fn print_state(trainer: &Trainer) {
    let p = trainer.params();
    println!("Epoch: {}", trainer.epoch());
    match trainer.last_loss() {
        Some(loss) => println!("Last avg epoch loss: {loss:.5}"),
        None => println!("Last avg epoch loss: N/A"),
    }
    println!("w1={:.4}, w2={:.4}, bias={:.4}", p.w1, p.w2, p.bias);
    for point in trainer.predictions() {
        if let Some(sample) = trainer.dataset().get(point.index) {
            println!(
                "  [{}] target: {:.4} prediction: {:.4}",
                point.index, sample.target, point.value
            );
        }
    }
}
